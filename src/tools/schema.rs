use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use crate::error::{LiveboxError, Result};
use crate::sandbox::SandboxEngine;
use crate::session::SessionContext;
use crate::tools::{ToolApprovalGate, ToolOutcome};

/// Remote backing store that holds an app's data schema.
#[async_trait]
pub trait RemoteSchemaStore: Send + Sync {
    async fn push_schema(&self, ctx: &SessionContext, schema: &str) -> Result<()>;
}

pub struct HttpSchemaStore {
    client: Client,
    base_url: String,
}

impl HttpSchemaStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn schema_url(&self, app_id: &str) -> String {
        format!("{}/apps/{}/schema", self.base_url, app_id)
    }
}

#[derive(Serialize)]
struct SchemaPushRequest<'a> {
    schema: &'a str,
}

#[async_trait]
impl RemoteSchemaStore for HttpSchemaStore {
    async fn push_schema(&self, ctx: &SessionContext, schema: &str) -> Result<()> {
        let app_id = ctx.app_id.as_deref().ok_or_else(|| LiveboxError::RemoteStore {
            message: "session has no app id".to_string(),
            status: None,
        })?;

        let mut request = self
            .client
            .post(self.schema_url(app_id))
            .header("content-type", "application/json")
            .json(&SchemaPushRequest { schema });
        if let Some(credential) = ctx.credential() {
            request = request.bearer_auth(credential);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LiveboxError::RemoteStore {
                message: error_text,
                status: Some(status.as_u16()),
            });
        }

        info!(app_id = %app_id, "Schema pushed to remote store");
        Ok(())
    }
}

/// Writes a schema file into the sandbox and pushes it to the remote store,
/// but only once a human has approved the call.
pub struct SchemaPushTool {
    gate: ToolApprovalGate,
    engine: Arc<dyn SandboxEngine>,
    store: Arc<dyn RemoteSchemaStore>,
    schema_file: String,
}

impl SchemaPushTool {
    pub fn new(
        gate: ToolApprovalGate,
        engine: Arc<dyn SandboxEngine>,
        store: Arc<dyn RemoteSchemaStore>,
        schema_file: impl Into<String>,
    ) -> Self {
        Self {
            gate,
            engine,
            store,
            schema_file: schema_file.into(),
        }
    }

    pub async fn invoke(
        &self,
        ctx: &SessionContext,
        tool_call_id: &str,
        schema: &str,
    ) -> Result<ToolOutcome<()>> {
        let outcome = self
            .gate
            .run(tool_call_id, move || async move {
                self.engine
                    .write_file(&self.schema_file, schema.as_bytes())
                    .await?;
                self.store.push_schema(ctx, schema).await
            })
            .await?;

        info!(
            tool_call_id = %tool_call_id,
            rejected = outcome.is_rejected(),
            "Schema push finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::sandbox::MemoryEngine;

    #[derive(Default)]
    struct RecordingStore {
        pushed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteSchemaStore for RecordingStore {
        async fn push_schema(&self, _ctx: &SessionContext, schema: &str) -> Result<()> {
            self.pushed.lock().unwrap().push(schema.to_string());
            Ok(())
        }
    }

    fn tool(
        gate: &ToolApprovalGate,
        engine: &Arc<MemoryEngine>,
        store: &Arc<RecordingStore>,
    ) -> SchemaPushTool {
        SchemaPushTool::new(
            gate.clone(),
            engine.clone(),
            store.clone(),
            "instant.schema.ts",
        )
    }

    async fn wait_until_pending(gate: &ToolApprovalGate, id: &str) {
        while !gate.is_pending(id) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn approved_push_writes_then_pushes() {
        let gate = ToolApprovalGate::new();
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(RecordingStore::default());
        let tool = tool(&gate, &engine, &store);
        let ctx = SessionContext::new(Some("app-1".to_string()), Some("secret".to_string()));

        let invoke = tool.invoke(&ctx, "call-1", "export default {}");
        let approve = async {
            wait_until_pending(&gate, "call-1").await;
            gate.approve("call-1");
        };
        let (outcome, _) = tokio::join!(invoke, approve);

        assert_eq!(outcome.unwrap(), ToolOutcome::Completed(()));
        assert_eq!(
            engine.file("instant.schema.ts"),
            Some(b"export default {}".to_vec())
        );
        assert_eq!(*store.pushed.lock().unwrap(), vec!["export default {}"]);
    }

    #[tokio::test]
    async fn rejected_push_touches_nothing() {
        let gate = ToolApprovalGate::new();
        let engine = Arc::new(MemoryEngine::new());
        let store = Arc::new(RecordingStore::default());
        let tool = tool(&gate, &engine, &store);
        let ctx = SessionContext::anonymous();

        let invoke = tool.invoke(&ctx, "call-2", "export default {}");
        let reject = async {
            wait_until_pending(&gate, "call-2").await;
            gate.reject("call-2");
        };
        let (outcome, _) = tokio::join!(invoke, reject);

        assert!(outcome.unwrap().is_rejected());
        assert!(engine.file("instant.schema.ts").is_none());
        assert!(store.pushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn http_store_requires_an_app_id() {
        let store = HttpSchemaStore::new("http://127.0.0.1:9/");
        let err = store
            .push_schema(&SessionContext::anonymous(), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, LiveboxError::RemoteStore { status: None, .. }));
    }

    #[test]
    fn schema_url_is_scoped_to_the_app() {
        let store = HttpSchemaStore::new("https://api.example.com/");
        assert_eq!(
            store.schema_url("app-1"),
            "https://api.example.com/apps/app-1/schema"
        );
    }
}
