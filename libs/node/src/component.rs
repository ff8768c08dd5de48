use std::sync::Arc;
use std::time::{Duration, Instant};

use harbor_fabric::{Arguments, Component, MethodError, Methods, Value};
use tokio::sync::Notify;

/// Time left for the exit answer to reach the peer before shutting down
const EXIT_GRACE: Duration = Duration::from_millis(100);

/// Component published by `harbor-node serve`
pub struct NodeComponent {
    name: String,
    started: Instant,
    exit: Arc<Notify>,
}

impl NodeComponent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Instant::now(),
            exit: Arc::new(Notify::new()),
        }
    }

    /// Resolves once a peer asked the component to exit
    pub async fn exit_requested(&self) {
        self.exit.notified().await
    }

    async fn echo(self: Arc<Self>, args: Arguments) -> Result<Value, MethodError> {
        Ok(Value::Map(
            args.iter()
                .map(|(name, value)| (name.to_string(), value.clone()))
                .collect(),
        ))
    }

    async fn uptime(self: Arc<Self>, _args: Arguments) -> Result<Value, MethodError> {
        let secs = i64::try_from(self.started.elapsed().as_secs())
            .map_err(|e| MethodError::new("OverflowError", e.to_string()))?;
        Ok(Value::Int(secs))
    }
}

#[async_trait::async_trait]
impl Component for NodeComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn register(methods: &mut Methods<Self>) {
        methods
            .add("echo", NodeComponent::echo)
            .add("uptime", NodeComponent::uptime);
    }

    async fn exit(&self) {
        tracing::info!("{} asked to exit", self.name);
        let exit = Arc::clone(&self.exit);
        tokio::spawn(async move {
            tokio::time::sleep(EXIT_GRACE).await;
            exit.notify_one();
        });
    }
}
