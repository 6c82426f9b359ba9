//! Blocking-worker invocation with optional timeout
//!
//! A native export cannot be interrupted mid-call. To bound how long a caller
//! waits, the call runs on a blocking worker and is abandoned (not killed) when
//! the timeout fires. The handler stays with the worker, so any output the
//! export produces after the timeout still reaches it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::extension::traits::{ExportStatus, Extension, ExtensionError};

/// Handler type accepted by the runner
pub type ResultHandler = Box<dyn FnMut(Vec<u8>) + Send + 'static>;

/// Invoke `export` on a blocking worker, waiting at most `limit`
///
/// `None` waits for the export to return however long it takes.
pub async fn invoke_with_timeout(
    extension: Arc<dyn Extension>,
    export: String,
    args: Vec<u8>,
    mut on_result: ResultHandler,
    limit: Option<Duration>,
) -> Result<ExportStatus, ExtensionError> {
    let export_name = export.clone();
    let id = extension.id().to_string();

    let worker = tokio::task::spawn_blocking(move || {
        extension.invoke(&export, &args, &mut *on_result)
    });

    let joined = match limit {
        Some(limit) => match timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    "Export {}::{} still running after {:?}; abandoning worker",
                    id, export_name, limit
                );
                return Err(ExtensionError::Timeout(export_name));
            }
        },
        None => worker.await,
    };

    match joined {
        Ok(result) => {
            debug!("Worker for {}::{} finished", id, export_name);
            result
        }
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(ExtensionError::WorkerFailed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::traits::ExtensionState;
    use std::sync::Mutex;

    /// In-process stand-in that "calls back" from the worker thread
    struct ScriptedExtension {
        delay: Duration,
        output: Vec<u8>,
        code: u32,
    }

    impl Extension for ScriptedExtension {
        fn id(&self) -> &str {
            "scripted"
        }

        fn architecture(&self) -> &str {
            std::env::consts::ARCH
        }

        fn state(&self) -> ExtensionState {
            ExtensionState::Loaded
        }

        fn load(&mut self) -> Result<(), ExtensionError> {
            Ok(())
        }

        fn invoke(
            &self,
            _export: &str,
            _args: &[u8],
            on_result: &mut dyn FnMut(Vec<u8>),
        ) -> Result<ExportStatus, ExtensionError> {
            std::thread::sleep(self.delay);
            on_result(self.output.clone());
            Ok(ExportStatus {
                code: self.code,
                deliveries: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_completes_within_limit() {
        let ext = Arc::new(ScriptedExtension {
            delay: Duration::from_millis(10),
            output: b"done".to_vec(),
            code: 0,
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let status = invoke_with_timeout(
            ext,
            "run".to_string(),
            Vec::new(),
            Box::new(move |bytes| sink.lock().unwrap().push(bytes)),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap();

        assert_eq!(status.code, 0);
        assert_eq!(*seen.lock().unwrap(), vec![b"done".to_vec()]);
    }

    #[tokio::test]
    async fn test_times_out_and_late_output_still_arrives() {
        let ext = Arc::new(ScriptedExtension {
            delay: Duration::from_millis(300),
            output: b"late".to_vec(),
            code: 0,
        });
        let (tx, rx) = std::sync::mpsc::channel();

        let err = invoke_with_timeout(
            ext,
            "slow".to_string(),
            Vec::new(),
            Box::new(move |bytes| {
                let _ = tx.send(bytes);
            }),
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtensionError::Timeout(ref name) if name == "slow"));

        let late = tokio::task::spawn_blocking(move || rx.recv_timeout(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(late, b"late");
    }

    #[tokio::test]
    async fn test_no_limit_waits_for_status() {
        let ext = Arc::new(ScriptedExtension {
            delay: Duration::from_millis(50),
            output: Vec::new(),
            code: 9,
        });

        let status = invoke_with_timeout(ext, "run".to_string(), Vec::new(), Box::new(|_| {}), None)
            .await
            .unwrap();
        assert_eq!(status.code, 9);
        assert!(status.check("run").is_err());
    }
}
