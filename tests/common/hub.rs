//! Minimal local model hub serving fixed files over HTTP/1.1

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One served file
#[derive(Debug, Clone)]
pub struct HubFile {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_length: bool,
    pub linked_etag: Option<String>,
}

impl HubFile {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            content_length: true,
            linked_etag: None,
        }
    }

    /// Body terminated by closing the connection instead of a `Content-Length`
    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    pub fn with_linked_etag(mut self, etag: impl Into<String>) -> Self {
        self.linked_etag = Some(etag.into());
        self
    }
}

/// Serves `<model_id>/resolve/main/<file>` paths until dropped
pub struct LocalHub {
    url: String,
    requests: Arc<Mutex<Vec<String>>>,
    task: tokio::task::JoinHandle<()>,
}

impl LocalHub {
    /// Start serving `files`, keyed by path relative to the model repository
    pub async fn serve(model_id: &str, files: Vec<(&str, HubFile)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let routes: Arc<HashMap<String, HubFile>> = Arc::new(
            files
                .into_iter()
                .map(|(name, file)| (format!("/{model_id}/resolve/main/{name}"), file))
                .collect(),
        );
        let requests = Arc::new(Mutex::new(Vec::new()));

        let task = {
            let requests = Arc::clone(&requests);
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let routes = Arc::clone(&routes);
                    let requests = Arc::clone(&requests);
                    tokio::spawn(async move {
                        let _ = respond(stream, &routes, &requests).await;
                    });
                }
            })
        };

        Self {
            url,
            requests,
            task,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request paths in arrival order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for LocalHub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn respond(
    mut stream: TcpStream,
    routes: &HashMap<String, HubFile>,
    requests: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        head.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&head);
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();
    requests.lock().unwrap().push(path.clone());

    let file = routes.get(&path).cloned().unwrap_or(HubFile {
        status: 404,
        body: b"not found".to_vec(),
        content_length: true,
        linked_etag: None,
    });

    let reason = if file.status == 200 { "OK" } else { "Not Found" };
    let mut response = format!("HTTP/1.1 {} {}\r\nConnection: close\r\n", file.status, reason);
    if file.content_length {
        response.push_str(&format!("Content-Length: {}\r\n", file.body.len()));
    }
    if let Some(etag) = &file.linked_etag {
        response.push_str(&format!("X-Linked-Etag: \"{etag}\"\r\n"));
    }
    response.push_str("\r\n");

    stream.write_all(response.as_bytes()).await?;
    for part in file.body.chunks(4096) {
        stream.write_all(part).await?;
        stream.flush().await?;
    }
    stream.shutdown().await
}
