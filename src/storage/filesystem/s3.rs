/*
 * Copyright 2025 Vijaykumar Singh
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Amazon S3 (and S3-compatible) storage backend built on aws-sdk-s3
//!
//! Uploads stream the reader in fixed-size parts through the multipart API so
//! an object is never held in memory as a whole. Objects smaller than one part
//! go through a single `PutObject`.

use async_trait::async_trait;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier};
use aws_sdk_s3::Client;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::Url;

use super::{ObjectReader, StorageClient, StorageError, StorageResult};
use crate::core::config::RemoteConfig;

/// Size of each multipart upload part
pub const PART_SIZE: usize = 8 * 1024 * 1024;

const DEFAULT_REGION: &str = "us-east-1";

pub struct S3Storage {
    client: Client,
    bucket: String,
}

impl S3Storage {
    pub async fn new(remote: &RemoteConfig) -> StorageResult<Self> {
        if remote.bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".to_string()));
        }

        let region = remote
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region));

        // IAM mode defers to the ambient provider chain
        if !remote.use_iam {
            if let (Some(access_key), Some(secret_key)) = (&remote.access_key, &remote.secret_key) {
                loader = loader.credentials_provider(Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "vecmigrate-static",
                ));
            }
        }
        let shared_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if let Some(endpoint) = &remote.endpoint {
            let url = endpoint_url(endpoint, remote.use_ssl)?;
            tracing::info!("🪣 Using S3-compatible endpoint {} for bucket {}", url, remote.bucket);
            builder = builder.endpoint_url(url.as_str().trim_end_matches('/')).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: remote.bucket.clone(),
        })
    }

    async fn put_single(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| network("PutObject", key, e))?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first_part: Vec<u8>,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut total = 0u64;
        let mut part_number = 1i32;
        let mut chunk = first_part;

        loop {
            let len = chunk.len();
            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| network("UploadPart", key, e))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            total += len as u64;
            tracing::debug!("📤 Uploaded part {} ({} bytes) of {}", part_number, len, key);

            chunk = read_part(reader).await?;
            if chunk.is_empty() {
                break;
            }
            part_number += 1;
        }

        Ok((parts, total))
    }
}

#[async_trait]
impl StorageClient for S3Storage {
    async fn get_object(&self, key: &str) -> StorageResult<ObjectReader> {
        let key = object_key(key);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    StorageError::NotFound(format!("s3://{}/{}", self.bucket, key))
                } else {
                    StorageError::Network(format!("GetObject {}: {}", key, DisplayErrorContext(&service)))
                }
            })?;

        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn upload_object(
        &self,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> StorageResult<u64> {
        let key = object_key(key);
        let first_part = read_part(reader).await?;

        if first_part.len() < PART_SIZE {
            let len = first_part.len() as u64;
            self.put_single(key, first_part).await?;
            tracing::debug!("✅ Put {} bytes to s3://{}/{}", len, self.bucket, key);
            return Ok(len);
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| network("CreateMultipartUpload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Network(format!("no upload id returned for {}", key)))?
            .to_string();

        match self.upload_parts(key, &upload_id, first_part, reader).await {
            Ok((parts, total)) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| network("CompleteMultipartUpload", key, e))?;
                tracing::debug!("✅ Multipart upload of {} bytes to s3://{}/{}", total, self.bucket, key);
                Ok(total)
            }
            Err(e) => {
                tracing::warn!("⚠️ Aborting multipart upload of {}: {}", key, e);
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::error!(
                        "❌ Abort of multipart upload {} failed: {}",
                        upload_id,
                        DisplayErrorContext(&abort_err)
                    );
                }
                Err(e)
            }
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let key = object_key(key);
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Network(format!(
                        "HeadObject {}: {}",
                        key,
                        DisplayErrorContext(&service)
                    )))
                }
            }
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let prefix = directory_prefix(prefix);
        let prefix = prefix.as_str();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut deleted = 0usize;
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| network("ListObjectsV2", prefix, e))?;

            let mut identifiers = Vec::new();
            for object in page.contents() {
                if let Some(key) = object.key() {
                    identifiers.push(
                        ObjectIdentifier::builder()
                            .key(key)
                            .build()
                            .map_err(|e| StorageError::Config(e.to_string()))?,
                    );
                }
            }
            if identifiers.is_empty() {
                continue;
            }

            let count = identifiers.len();
            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::Config(e.to_string()))?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| network("DeleteObjects", prefix, e))?;
            deleted += count;
        }

        tracing::debug!("🗑️ Deleted {} objects under s3://{}/{}", deleted, self.bucket, prefix);
        Ok(())
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }
}

/// S3 keys never carry a leading slash
fn object_key(key: &str) -> &str {
    key.trim_start_matches('/')
}

/// Listing prefix for everything under `prefix` and nothing beside it
fn directory_prefix(prefix: &str) -> String {
    let key = object_key(prefix);
    if key.ends_with('/') {
        key.to_string()
    } else {
        format!("{}/", key)
    }
}

fn network<E>(operation: &str, key: &str, err: E) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Network(format!("{} {}: {}", operation, key, DisplayErrorContext(&err)))
}

/// Normalise a configured endpoint into a URL, adding a scheme if missing
fn endpoint_url(endpoint: &str, use_ssl: bool) -> StorageResult<Url> {
    let raw = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        let scheme = if use_ssl { "https" } else { "http" };
        format!("{}://{}", scheme, endpoint)
    };

    let url = Url::parse(&raw)?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(StorageError::UnsupportedScheme(other.to_string())),
    }
}

/// Fill up to one part from the reader; a short result means EOF
async fn read_part(reader: &mut (dyn AsyncRead + Send + Unpin)) -> StorageResult<Vec<u8>> {
    let mut part = Vec::with_capacity(PART_SIZE);
    let mut limited = reader.take(PART_SIZE as u64);
    limited.read_to_end(&mut part).await?;
    Ok(part)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_adds_scheme() {
        assert_eq!(
            endpoint_url("minio:9000", false).unwrap().as_str(),
            "http://minio:9000/"
        );
        assert_eq!(
            endpoint_url("s3.example.com", true).unwrap().scheme(),
            "https"
        );
        assert!(matches!(
            endpoint_url("ftp://files.example.com", false),
            Err(StorageError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_object_key_strips_leading_slash() {
        assert_eq!(object_key("/out/meta.json"), "out/meta.json");
        assert_eq!(object_key("out/meta.json"), "out/meta.json");
    }

    #[test]
    fn test_directory_prefix_excludes_siblings() {
        assert_eq!(directory_prefix("out"), "out/");
        assert_eq!(directory_prefix("/migration/out/"), "migration/out/");
        assert!(!"outbox/meta.json".starts_with(&directory_prefix("out")));
        assert!("out/tables/c/1/id.npy".starts_with(&directory_prefix("out")));
    }

    #[tokio::test]
    async fn test_read_part_stops_at_part_size() {
        let data = vec![7u8; PART_SIZE + 10];
        let mut reader: &[u8] = &data;

        let first = read_part(&mut reader).await.unwrap();
        assert_eq!(first.len(), PART_SIZE);
        let second = read_part(&mut reader).await.unwrap();
        assert_eq!(second.len(), 10);
        let third = read_part(&mut reader).await.unwrap();
        assert!(third.is_empty());
    }
}
