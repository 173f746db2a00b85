use std::future::Future;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use http::{Request, Response};
use hyper::Body;
use log::{error, trace};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::client::{Client, Config};
use crate::wait;

type OneshotResponse = oneshot::Sender<crate::Result<Response<Body>>>;
type ThreadSender = mpsc::UnboundedSender<(Request<Body>, bool, OneshotResponse)>;

/// Owns the dedicated runtime thread the underlying client lives on.
///
/// A connection creates one lazily at first execution; the thread stays
/// alive as long as the handle (or a [`KeepThreadAlive`] taken from it, held
/// by a response body reader) exists.
pub(crate) struct ClientHandle {
    inner: Arc<InnerClientHandle>,
}

struct InnerClientHandle {
    tx: Option<ThreadSender>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for InnerClientHandle {
    fn drop(&mut self) {
        let id = self
            .thread
            .as_ref()
            .map(|h| h.thread().id())
            .expect("thread not dropped yet");

        trace!("closing runtime thread ({:?})", id);
        self.tx.take();
        trace!("signaled close for runtime thread ({:?})", id);
        self.thread.take().map(|h| h.join());
        trace!("closed runtime thread ({:?})", id);
    }
}

impl ClientHandle {
    pub(crate) fn new(config: Config) -> crate::Result<ClientHandle> {
        let (tx, rx) = mpsc::unbounded_channel::<(Request<Body>, bool, OneshotResponse)>();
        let (spawn_tx, spawn_rx) = oneshot::channel::<crate::Result<()>>();
        let handle = thread::Builder::new()
            .name("git-http-hyper-runtime".into())
            .spawn(move || {
                use tokio::runtime;
                let rt = match runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(crate::error::builder)
                {
                    Err(e) => {
                        if let Err(e) = spawn_tx.send(Err(e)) {
                            error!("Failed to communicate runtime creation failure: {:?}", e);
                        }
                        return;
                    }
                    Ok(v) => v,
                };

                let f = async move {
                    let client = match Client::new(config) {
                        Err(e) => {
                            if let Err(e) = spawn_tx.send(Err(e)) {
                                error!("Failed to communicate client creation failure: {:?}", e);
                            }
                            return;
                        }
                        Ok(v) => v,
                    };
                    if let Err(e) = spawn_tx.send(Ok(())) {
                        error!("Failed to communicate successful startup: {:?}", e);
                        return;
                    }

                    let mut rx = rx;

                    while let Some((req, has_body, req_tx)) = rx.recv().await {
                        let client = client.clone();
                        let req_fut = async move { client.execute(req, has_body).await };
                        tokio::spawn(forward(req_fut, req_tx));
                    }

                    trace!("({:?}) Receiver is shutdown", thread::current().id());
                };

                trace!("({:?}) start runtime::block_on", thread::current().id());
                rt.block_on(f);
                trace!("({:?}) end runtime::block_on", thread::current().id());
                drop(rt);
                trace!("({:?}) finished", thread::current().id());
            })
            .map_err(crate::error::builder)?;

        // Wait for the runtime thread to start up...
        match wait::timeout(spawn_rx, None) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => return Err(err),
            Err(_canceled) => event_loop_panicked(),
        }

        Ok(ClientHandle {
            inner: Arc::new(InnerClientHandle {
                tx: Some(tx),
                thread: Some(handle),
            }),
        })
    }

    pub(crate) fn execute(
        &self,
        req: Request<Body>,
        has_body: bool,
        timeout: Option<Duration>,
        url: &Url,
    ) -> crate::Result<Response<Body>> {
        let (tx, rx) = oneshot::channel();

        self.inner
            .tx
            .as_ref()
            .expect("core thread exited early")
            .send((req, has_body, tx))
            .expect("core thread panicked");

        let result: Result<crate::Result<Response<Body>>, wait::Waited<crate::Error>> =
            wait::timeout(
                async move { rx.await.map_err(|_canceled| event_loop_panicked()) },
                timeout,
            );

        match result {
            Ok(Err(err)) => Err(err),
            Ok(Ok(res)) => Ok(res),
            Err(wait::Waited::TimedOut(e)) => Err(crate::error::request(e).with_url(url.clone())),
            Err(wait::Waited::Inner(err)) => Err(err),
        }
    }

    pub(crate) fn keep_alive(&self) -> KeepThreadAlive {
        KeepThreadAlive(Some(self.inner.clone()))
    }
}

async fn forward<F>(fut: F, mut tx: OneshotResponse)
where
    F: Future<Output = crate::Result<Response<Body>>>,
{
    use std::task::Poll;

    futures_util::pin_mut!(fut);

    // "select" on the sender being canceled, and the future completing
    let res = futures_util::future::poll_fn(|cx| {
        match fut.as_mut().poll(cx) {
            Poll::Ready(val) => Poll::Ready(Some(val)),
            Poll::Pending => {
                // check if the callback is canceled
                futures_core::ready!(tx.poll_closed(cx));
                Poll::Ready(None)
            }
        }
    })
    .await;

    if let Some(res) = res {
        let _ = tx.send(res);
    }
    // else request is canceled
}

#[allow(dead_code)]
pub(crate) struct KeepThreadAlive(Option<Arc<InnerClientHandle>>);

#[cold]
#[inline(never)]
fn event_loop_panicked() -> ! {
    // The only possible reason there would be a Canceled error
    // is if the thread running the event loop panicked. We could return
    // an Err here, like a BrokenPipe, but the Client is not
    // recoverable. Additionally, the panic in the other thread
    // is not normal, and should likely be propagated.
    panic!("event loop thread panicked");
}
