//! Amazon S3 (and S3-compatible) object store.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use log::info;
use tokio::runtime::Runtime;

use crate::error::{Error, Result};
use crate::remote::{ObjectStore, PutObject};

/// Blocking S3 client with a deadline on every call.
///
/// Credentials are resolved through the standard AWS provider chain:
/// environment, shared profile, web identity (IRSA), container and instance
/// metadata. `AWS_ENDPOINT_URL` points the client at an S3-compatible service
/// using path-style addressing.
pub struct S3Store {
    client: Client,
    bucket: String,
    timeout: Duration,
    runtime: Runtime,
}

impl S3Store {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Remote(format!("start s3 runtime: {e}")))?;

        let sdk_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.into()))
                .timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build())
                .load(),
        );

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Ok(endpoint) = std::env::var("AWS_ENDPOINT_URL") {
            info!("Using S3 endpoint {}", endpoint);
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.into(),
            timeout,
            runtime,
        })
    }

    /// Drive `call` to completion, failing it once the deadline passes.
    fn block_on<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        let deadline = self.timeout;
        self.runtime
            .block_on(async move { tokio::time::timeout(deadline, call).await })
            .unwrap_or_else(|_| {
                Err(Error::Remote(format!("{what}: timed out after {deadline:?}")))
            })
    }
}

fn sdk_error<E: std::error::Error>(what: &str, err: E) -> Error {
    Error::Remote(format!("{what}: {}", DisplayErrorContext(&err)))
}

impl ObjectStore for S3Store {
    fn head_bucket(&self) -> Result<()> {
        let call = async {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|err| sdk_error("head bucket", err))
        };
        self.block_on("head bucket", call)?;
        Ok(())
    }

    fn put_object(&self, request: PutObject) -> Result<()> {
        let what = format!("put {}", request.key);
        let metadata: HashMap<String, String> = request.metadata.into_iter().collect();
        let call = async {
            // streamed from disk in chunks
            let body = ByteStream::from_path(&request.source)
                .await
                .map_err(|err| Error::Remote(format!("read {}: {err}", request.source.display())))?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&request.key)
                .body(body)
                .content_type(&request.content_type)
                .content_encoding(&request.content_encoding)
                .set_metadata(Some(metadata))
                .send()
                .await
                .map_err(|err| sdk_error(&what, err))
        };
        self.block_on(&what, call)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{}", self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chain_provides_credentials() -> Result<()> {
        // no static keys needed: the provider chain resolves them lazily
        let store = S3Store::new("archive", "eu-west-1", Duration::from_secs(5))?;

        let config = store.client.config();
        assert!(config.credentials_provider().is_some());
        assert_eq!(config.region(), Some(&Region::new("eu-west-1")));
        assert_eq!(store.describe(), "s3://archive");
        Ok(())
    }
}
