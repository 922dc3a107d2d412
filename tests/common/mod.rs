//! A scripted servlet backend on localhost for client tests.

#![allow(dead_code)]

use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tiny_http::{Header, Response, Server};

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub body: String,
}

impl CapturedRequest {
    pub fn path(&self) -> &str {
        self.url.split('?').next().unwrap_or_default()
    }

    pub fn query(&self) -> Vec<(String, String)> {
        let parsed = url::Url::parse(&format!("http://localhost{}", self.url)).unwrap();
        parsed.query_pairs().into_owned().collect()
    }
}

pub type Route = dyn Fn(&CapturedRequest) -> (u16, String) + Send + Sync;

pub struct MockServlet {
    pub base_url: String,
    requests: Receiver<CapturedRequest>,
    server: Arc<Server>,
}

impl MockServlet {
    pub fn start<F>(route: F) -> Self
    where
        F: Fn(&CapturedRequest) -> (u16, String) + Send + Sync + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind mock servlet"));
        let addr = server.server_addr().to_ip().expect("tcp listener");
        let base_url = format!("http://{addr}/");
        let (tx, rx) = unbounded();
        let worker = Arc::clone(&server);
        let route: Arc<Route> = Arc::new(route);
        thread::spawn(move || serve(worker, route, tx));
        Self {
            base_url,
            requests: rx,
            server,
        }
    }

    pub fn next_request(&self) -> CapturedRequest {
        self.requests
            .recv_timeout(Duration::from_secs(5))
            .expect("mock servlet received a request")
    }

    pub fn no_more_requests(&self) -> bool {
        self.requests
            .recv_timeout(Duration::from_millis(200))
            .is_err()
    }
}

impl Drop for MockServlet {
    fn drop(&mut self) {
        self.server.unblock();
    }
}

fn serve(server: Arc<Server>, route: Arc<Route>, tx: Sender<CapturedRequest>) {
    for mut request in server.incoming_requests() {
        let mut body = String::new();
        let _ = request.as_reader().read_to_string(&mut body);
        let captured = CapturedRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            body,
        };
        let (status, body) = route(&captured);
        let _ = tx.send(captured);
        let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
            .expect("static header");
        let _ = request.respond(
            Response::from_string(body)
                .with_status_code(status)
                .with_header(header),
        );
    }
}

/// JSON string body, the way the servlets encode sentinels and URLs.
pub fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap()
}
