#![allow(dead_code, clippy::unwrap_used)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harbor_core::Config;
use harbor_fabric::{Arguments, Component, MethodError, Methods, Value};
use tokio::sync::Notify;
use tracing_subscriber::fmt::MakeWriter;

/// Component exercised by the publisher and connector tests
#[derive(Default)]
pub struct TestComponent {
    pub exits: AtomicUsize,
    pub release: Notify,
}

impl TestComponent {
    pub fn exit_count(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Component for TestComponent {
    fn name(&self) -> &str {
        "test"
    }

    fn register(methods: &mut Methods<Self>) {
        methods
            .add("echo", |_component, mut args: Arguments| async move {
                Ok::<_, MethodError>(args.remove("value").unwrap_or_default())
            })
            .add("sleep", |_component, mut args: Arguments| async move {
                let ms: i64 = args.take("ms")?;
                tokio::time::sleep(Duration::from_millis(ms as u64)).await;
                Ok::<_, MethodError>(args.remove("value").unwrap_or_default())
            })
            .add("fail", |_component, _args| async move {
                Err::<Value, _>(MethodError::new("ValueError", "bad value"))
            })
            .add("wait", |component: Arc<TestComponent>, _args| async move {
                component.release.notified().await;
                Ok::<_, MethodError>(true)
            });
    }

    async fn exit(&self) {
        self.exits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Config rooted in a fresh temporary directory
pub fn temp_config() -> (tempfile::TempDir, Config) {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::with_data_path(dir.path());
    (dir, config)
}

/// In-memory sink for formatted log lines
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Capture log output of the current thread until the guard is dropped
pub fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}
