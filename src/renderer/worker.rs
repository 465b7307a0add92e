use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;
use url::Url;

use super::{RenderConfig, Renderer};
use crate::error::{Error, RenderError, Result};
use crate::pipeline::cancel::CancelToken;
use crate::rendering::RasterImage;

/// Builds one render context. Called once per worker, on the worker's thread.
pub type RendererFactory<R> = Arc<dyn Fn(RenderConfig) -> std::result::Result<R, RenderError> + Send + Sync>;

/// Factory that builds renderers with [`Renderer::new`].
pub fn default_factory<R: Renderer + 'static>() -> RendererFactory<R> {
    Arc::new(|config| R::new(config))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

enum Command {
    Capture(Url, oneshot::Sender<std::result::Result<RasterImage, RenderError>>),
    Close(oneshot::Sender<std::result::Result<(), RenderError>>),
}

/// An async-friendly handle to a renderer living on a dedicated thread.
///
/// The thread owns the render context exclusively; captures are executed in
/// the order they are requested. Renderers need not be `Send` themselves
/// because they are constructed on the worker thread.
pub struct RenderWorker {
    id: usize,
    cmd_tx: Sender<Command>,
}

impl RenderWorker {
    /// Spawn the worker thread and wait for its renderer to come up.
    pub async fn spawn<R>(id: usize, factory: RendererFactory<R>, config: RenderConfig, cancel: CancelToken) -> Result<Self>
    where
        R: Renderer + 'static,
    {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx) = oneshot::channel::<std::result::Result<(), RenderError>>();

        thread::Builder::new()
            .name(format!("render-worker-{}", id))
            .spawn(move || {
                // Initialize the renderer on the worker thread
                let mut renderer = match factory(config) {
                    Ok(r) => r,
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let _ = init_tx.send(Ok(()));

                // Command loop
                while let Ok(cmd) = cmd_rx.recv() {
                    match cmd {
                        Command::Capture(url, resp) => {
                            // A page that crashes the renderer fails alone; the
                            // thread stays up for the next capture.
                            let res = panic::catch_unwind(AssertUnwindSafe(|| renderer.capture(&url, &cancel)))
                                .unwrap_or_else(|payload| {
                                    let msg = panic_message(payload.as_ref());
                                    log::error!("render worker {} panicked on {}: {}", id, url, msg);
                                    Err(RenderError::Crashed(msg))
                                });
                            let _ = resp.send(res);
                        }
                        Command::Close(resp) => {
                            let _ = resp.send(renderer.close());
                            return;
                        }
                    }
                }
                // Handle dropped without an explicit close
                if let Err(e) = renderer.close() {
                    log::warn!("render worker {} failed to close cleanly: {}", id, e);
                }
            })
            .map_err(|e| Error::WorkerError(format!("cannot spawn render thread {}: {}", id, e)))?;

        let init_res = init_rx
            .await
            .map_err(|e| Error::WorkerError(format!("render worker {} init canceled: {}", id, e)))?;
        init_res.map_err(|e| Error::WorkerError(format!("render worker {}: {}", id, e)))?;

        Ok(Self { id, cmd_tx })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Capture `url` on the worker thread.
    pub async fn capture(&self, url: &Url) -> std::result::Result<RasterImage, RenderError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Capture(url.clone(), tx))
            .map_err(|_| RenderError::Init(format!("render worker {} has stopped", self.id)))?;
        rx.await
            .map_err(|_| RenderError::Init(format!("render worker {} dropped the capture", self.id)))?
    }

    /// Shut down the worker thread and close its renderer.
    pub async fn close(self) -> std::result::Result<(), RenderError> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Close(tx)).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Solid;

    impl Renderer for Solid {
        fn new(_config: RenderConfig) -> std::result::Result<Self, RenderError> {
            Ok(Solid)
        }

        fn capture(&mut self, url: &Url, _cancel: &CancelToken) -> std::result::Result<RasterImage, RenderError> {
            if url.path() == "/broken" {
                return Err(RenderError::NavigationFailure("broken".into()));
            }
            if url.path() == "/explode" {
                panic!("layout blew up");
            }
            Ok(RasterImage::solid(4, 4, [9, 9, 9]))
        }

        fn close(self) -> std::result::Result<(), RenderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_captures_on_its_thread() {
        let factory: RendererFactory<Solid> = Arc::new(Solid::new);
        let worker = RenderWorker::spawn(0, factory, RenderConfig::default(), CancelToken::new()).await.unwrap();

        let ok = worker.capture(&Url::parse("http://a.test/").unwrap()).await.unwrap();
        assert_eq!(ok.pixel(0, 0), [9, 9, 9]);
        let err = worker.capture(&Url::parse("http://a.test/broken").unwrap()).await.unwrap_err();
        assert!(matches!(err, RenderError::NavigationFailure(_)));
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn worker_survives_a_panicking_capture() {
        let factory: RendererFactory<Solid> = Arc::new(Solid::new);
        let worker = RenderWorker::spawn(1, factory, RenderConfig::default(), CancelToken::new()).await.unwrap();

        let err = worker.capture(&Url::parse("http://a.test/explode").unwrap()).await.unwrap_err();
        assert_eq!(err, RenderError::Crashed("layout blew up".into()));
        assert!(!err.is_transient());

        let ok = worker.capture(&Url::parse("http://a.test/").unwrap()).await.unwrap();
        assert_eq!(ok.pixel(0, 0), [9, 9, 9]);
        worker.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_init_is_a_worker_error() {
        let factory: RendererFactory<Solid> = Arc::new(|_| Err(RenderError::Init("no browser".into())));
        let err = RenderWorker::spawn(3, factory, RenderConfig::default(), CancelToken::new()).await.err().unwrap();
        assert!(matches!(err, Error::WorkerError(_)));
    }
}
