//! Merged log tails
//!
//! Opens one following, timestamped log stream per container and merges
//! them into a single stream of labeled chunks. Dropping or closing the
//! merged stream closes every source.

use super::api::{ClusterApi, LogStream};
use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, SelectAll};
use futures::{Stream, StreamExt, TryStreamExt};
use pin_project::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

/// One piece of output from one container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogChunk {
    pub container: String,
    pub data: Bytes,
}

impl LogChunk {
    /// Leading RFC 3339 timestamp the api server prefixes to each line
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let text = std::str::from_utf8(&self.data).ok()?;
        let first = text.split_whitespace().next()?;
        DateTime::parse_from_rfc3339(first)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }

    /// `[container] <data>`
    #[must_use]
    pub fn render(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.container.len() + 3 + self.data.len());
        out.put_u8(b'[');
        out.put_slice(self.container.as_bytes());
        out.put_slice(b"] ");
        out.put_slice(&self.data);
        out.freeze()
    }
}

/// Opens and merges per-container log streams for one pod
#[derive(Clone)]
pub struct LogMultiplexer {
    api: Arc<dyn ClusterApi>,
}

impl LogMultiplexer {
    #[must_use]
    pub fn new(api: Arc<dyn ClusterApi>) -> Self {
        Self { api }
    }

    /// Open every container's log, or none of them.
    ///
    /// # Errors
    ///
    /// Returns the first open failure after closing the streams already opened
    pub async fn open(
        &self,
        namespace: &str,
        pod: &str,
        containers: &[String],
    ) -> Result<MergedLogStream> {
        let mut opened: Vec<(String, LogStream)> = Vec::with_capacity(containers.len());

        for container in containers {
            match self.api.open_log(namespace, pod, container).await {
                Ok(stream) => opened.push((container.clone(), stream)),
                Err(e) => {
                    warn!(
                        "❌ Failed to open log for {}/{} [{}]: {}, closing {} opened streams",
                        namespace,
                        pod,
                        container,
                        e,
                        opened.len()
                    );
                    drop(opened);
                    return Err(e);
                }
            }
        }

        debug!("📜 Following {} log streams for {}/{}", opened.len(), namespace, pod);
        Ok(MergedLogStream::new(opened))
    }
}

/// Stream of `LogChunk`s from every source; ends when all sources end
#[pin_project]
pub struct MergedLogStream {
    #[pin]
    inner: SelectAll<BoxStream<'static, Result<LogChunk>>>,
    sources: Vec<String>,
}

impl MergedLogStream {
    fn new(opened: Vec<(String, LogStream)>) -> Self {
        let sources = opened.iter().map(|(name, _)| name.clone()).collect();
        let inner = opened
            .into_iter()
            .map(|(container, stream)| {
                stream
                    .map_ok(move |data| LogChunk {
                        container: container.clone(),
                        data,
                    })
                    .map_err(Error::from)
                    .boxed()
            })
            .collect();

        Self { inner, sources }
    }

    /// Container names in the order they were opened
    #[must_use]
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Close every source now; the stream yields nothing afterwards
    pub fn close(&mut self) {
        debug!("📜 Closing {} log streams", self.sources.len());
        self.inner = SelectAll::new();
    }

    /// Rendered `[container] line` bytes as an `AsyncRead`
    pub fn into_async_read(self) -> impl AsyncRead + Send {
        StreamReader::new(self.map(|item| {
            item.map(|chunk| chunk.render()).map_err(|e| match e {
                Error::Io(io) => io,
                other => std::io::Error::other(other),
            })
        }))
    }
}

impl Stream for MergedLogStream {
    type Item = Result<LogChunk>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
