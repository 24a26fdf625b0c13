use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LiveboxError, Result};
use crate::sandbox::SandboxEngine;
use crate::session::SessionContext;

/// Replace a file's whole content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifyFileAction {
    pub path: String,
    pub content: String,
}

/// Applies modify-file actions against the live sandbox. Only success or
/// failure matters to the caller.
#[async_trait]
pub trait EditResolver: Send + Sync {
    async fn apply(
        &self,
        ctx: &SessionContext,
        engine: &dyn SandboxEngine,
        action: &ModifyFileAction,
    ) -> Result<()>;
}

/// Writes the new content straight through the engine filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteThroughResolver;

#[async_trait]
impl EditResolver for WriteThroughResolver {
    async fn apply(
        &self,
        ctx: &SessionContext,
        engine: &dyn SandboxEngine,
        action: &ModifyFileAction,
    ) -> Result<()> {
        debug!(session = %ctx.id, path = %action.path, "Applying edit");
        engine
            .write_file(&action.path, action.content.as_bytes())
            .await
            .map_err(|e| LiveboxError::EditResolution {
                path: action.path.clone(),
                reason: e.to_string(),
            })
    }
}
