//! HTTP test server usable from blocking tests.

use std::thread;

use axum::Router;
use tokio::{net::TcpListener, runtime::Builder, sync::oneshot};
use url::Url;

/// Serves `router` on a random localhost port from a dedicated runtime thread,
/// so blocking HTTP clients can talk to it from plain test threads.
pub struct TestHttpServer {
    base_url: Url,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TestHttpServer {
    /// # Panics
    ///
    /// Panics if the runtime cannot start or the listener cannot bind.
    pub fn new(router: Router) -> Self {
        let (addr_tx, addr_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = thread::Builder::new()
            .name("test-http".into())
            .spawn(move || {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(2)
                    .enable_all()
                    .build()
                    .expect("build test runtime");
                runtime.block_on(async move {
                    let listener = TcpListener::bind("127.0.0.1:0")
                        .await
                        .expect("bind test HTTP listener");
                    let addr = listener.local_addr().expect("read local addr");
                    addr_tx.send(addr).ok();

                    axum::serve(listener, router)
                        .with_graceful_shutdown(async {
                            shutdown_rx.await.ok();
                        })
                        .await
                        .expect("run test HTTP server");
                });
            })
            .expect("spawn test server thread");

        let addr = addr_rx.blocking_recv().expect("test server address");
        Self {
            base_url: Url::parse(&format!("http://{addr}")).expect("parse base URL"),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Join path to server base URL.
    ///
    /// # Panics
    ///
    /// Panics if URL join fails.
    #[must_use]
    pub fn url(&self, path: &str) -> Url {
        self.base_url.join(path).expect("join server URL path")
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

impl Drop for TestHttpServer {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
