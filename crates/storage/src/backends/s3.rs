//! S3 object-storage backend using the AWS SDK, with optional CloudFront
//! edge-cache invalidation.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ChildEntry, ChildStream, ChildrenMode, Storage};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::types::{Grant, ObjectCannedAcl, Permission, Type};
use aws_sdk_s3::Client;
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use symvault_core::format::BOOKKEEPING_NAME;
use symvault_core::{AccessMode, StoragePath};
use tracing::{instrument, warn};
use uuid::Uuid;

/// Grantee URI identifying the anonymous all-users group.
const ALL_USERS_GROUP_URI: &str = "http://acs.amazonaws.com/groups/global/AllUsers";

/// CloudFront caps invalidation batches; beyond this we fall back to a
/// wildcard invalidation.
const MAX_INVALIDATION_PATHS: usize = 3000;

/// S3-backed symbol store.
pub struct S3Storage {
    client: Client,
    bucket: String,
    cloudfront: Option<(aws_sdk_cloudfront::Client, String)>,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("cloudfront", &self.cloudfront.as_ref().map(|(_, id)| id))
            .finish_non_exhaustive()
    }
}

impl S3Storage {
    /// Create a new S3 store. Explicit credentials are used when both key
    /// parts are supplied, otherwise the ambient AWS credential chain.
    pub async fn new(
        bucket: &str,
        region: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        cloudfront_distribution_id: Option<String>,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let resolved_region = region.unwrap_or_else(|| "us-east-1".to_string());
        let aws_region = aws_config::Region::new(resolved_region.clone());

        let credentials = match (access_key_id, secret_access_key) {
            (Some(key_id), Some(secret)) => SharedCredentialsProvider::new(
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "symvault-config"),
            ),
            _ => {
                let chain =
                    aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                        .region(aws_region.clone())
                        .build()
                        .await;
                SharedCredentialsProvider::new(chain)
            }
        };

        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_region.clone())
            .credentials_provider(credentials.clone())
            .build();
        let client = Client::from_conf(s3_config);

        let cloudfront = cloudfront_distribution_id.map(|distribution_id| {
            let config = aws_sdk_cloudfront::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(aws_region)
                .credentials_provider(credentials)
                .build();
            (aws_sdk_cloudfront::Client::from_conf(config), distribution_id)
        });

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            cloudfront,
        })
    }

    /// `CopySource` header value: raw bucket, `/`, percent-encoded key.
    fn copy_source(&self, src: &StoragePath) -> String {
        format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(src.as_str(), NON_ALPHANUMERIC)
        )
    }

    fn map_err<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::S3(Box::new(err))
    }
}

/// Map an access mode to the canned ACL it is persisted as.
fn canned_acl(mode: AccessMode) -> Option<ObjectCannedAcl> {
    match mode {
        AccessMode::Public => Some(ObjectCannedAcl::PublicRead),
        AccessMode::Private => Some(ObjectCannedAcl::Private),
        AccessMode::Unknown => None,
    }
}

/// Classify an existing grant set by exact matching: owner full-control plus
/// optionally public read is recognized; anything else is `Unknown`.
fn classify_grants(owner_id: Option<&str>, grants: &[Grant]) -> AccessMode {
    let mut owner_full_control = false;
    let mut public_read = false;

    for grant in grants {
        let grantee = grant.grantee();
        let permission = grant.permission();
        let owner_fc = grantee.is_some_and(|g| {
            g.r#type() == &Type::CanonicalUser && g.id() == owner_id && owner_id.is_some()
        }) && permission == Some(&Permission::FullControl);
        let anon_read = grantee
            .is_some_and(|g| g.r#type() == &Type::Group && g.uri() == Some(ALL_USERS_GROUP_URI))
            && permission == Some(&Permission::Read);

        if owner_fc {
            owner_full_control = true;
        } else if anon_read {
            public_read = true;
        } else {
            return AccessMode::Unknown;
        }
    }

    match (owner_full_control, public_read) {
        (true, true) => AccessMode::Public,
        (true, false) => AccessMode::Private,
        _ => AccessMode::Unknown,
    }
}

#[async_trait]
impl Storage for S3Storage {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn exists(&self, path: &StoragePath) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path.as_str())
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::S3(Box::new(service_err)))
                }
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, path: &StoragePath) -> StorageResult<()> {
        // S3 treats deletion of a missing key as success.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path.as_str())
            .send()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn rename(
        &self,
        src: &StoragePath,
        dst: &StoragePath,
        mode: AccessMode,
    ) -> StorageResult<()> {
        // No server-side move: copy with the target ACL, then delete the
        // original.
        let mut copy = self
            .client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(self.copy_source(src))
            .key(dst.as_str());
        if let Some(acl) = canned_acl(mode) {
            copy = copy.acl(acl);
        }
        copy.send().await.map_err(Self::map_err)?;
        self.delete(src).await
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn length(&self, path: &StoragePath) -> StorageResult<u64> {
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path.as_str())
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    StorageError::NotFound(path.to_string())
                } else {
                    StorageError::S3(Box::new(service_err))
                }
            })?;
        Ok(head.content_length().unwrap_or(0) as u64)
    }

    fn supports_access_mode(&self) -> bool {
        true
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn access_mode(&self, path: &StoragePath) -> StorageResult<AccessMode> {
        let acl = self
            .client
            .get_object_acl()
            .bucket(&self.bucket)
            .key(path.as_str())
            .send()
            .await
            .map_err(Self::map_err)?;
        let owner_id = acl.owner().and_then(|o| o.id()).map(str::to_string);
        Ok(classify_grants(owner_id.as_deref(), acl.grants()))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn set_access_mode(&self, path: &StoragePath, mode: AccessMode) -> StorageResult<()> {
        let Some(acl) = canned_acl(mode) else {
            return Ok(());
        };
        self.client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(path.as_str())
            .acl(acl)
            .send()
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn read(&self, path: &StoragePath) -> StorageResult<Bytes> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path.as_str())
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    StorageError::NotFound(path.to_string())
                } else {
                    StorageError::S3(Box::new(service_err))
                }
            })?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?;
        Ok(data.into_bytes())
    }

    #[instrument(skip(self, data), fields(backend = "s3", size = data.len()))]
    async fn write(&self, path: &StoragePath, mode: AccessMode, data: Bytes) -> StorageResult<()> {
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path.as_str())
            .body(aws_sdk_s3::primitives::ByteStream::from(data));
        if let Some(acl) = canned_acl(mode) {
            put = put.acl(acl);
        }
        put.send().await.map_err(Self::map_err)?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn is_empty(&self) -> StorageResult<bool> {
        let mut continuation: Option<String> = None;
        loop {
            let mut request = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }
            let page = request.send().await.map_err(Self::map_err)?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if key.ends_with('/') {
                    continue; // directory marker pseudo-entry
                }
                if key == BOOKKEEPING_NAME || key.starts_with(&format!("{BOOKKEEPING_NAME}/")) {
                    continue;
                }
                return Ok(false);
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => return Ok(true),
            }
        }
    }

    fn children<'a>(
        &'a self,
        mode: ChildrenMode,
        prefix: Option<&StoragePath>,
    ) -> ChildStream<'a> {
        let key_prefix = prefix.map(|p| format!("{p}/"));

        let stream = async_stream::try_stream! {
            let mut continuation: Option<String> = None;
            loop {
                let mut request = self.client.list_objects_v2().bucket(&self.bucket);
                if let Some(key_prefix) = &key_prefix {
                    request = request.prefix(key_prefix);
                }
                if let Some(token) = &continuation {
                    request = request.continuation_token(token);
                }
                let page = request.send().await.map_err(Self::map_err)?;

                for object in page.contents() {
                    let Some(key) = object.key() else { continue };
                    if key.ends_with('/') {
                        continue; // directory marker pseudo-entry
                    }
                    let path = StoragePath::new(key)
                        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
                    let size = match mode {
                        // Listing pages already carry sizes; no extra round trip.
                        ChildrenMode::WithSize => object.size().map(|s| s as u64),
                        ChildrenMode::WithoutSize => None,
                    };
                    yield ChildEntry { path, size };
                }

                match page.next_continuation_token() {
                    Some(token) => continuation = Some(token.to_string()),
                    None => break,
                }
            }
        };

        Box::pin(stream)
    }

    #[instrument(skip(self, paths), fields(backend = "s3"))]
    async fn invalidate_external_services(
        &self,
        paths: Option<&[StoragePath]>,
    ) -> StorageResult<()> {
        let Some((client, distribution_id)) = &self.cloudfront else {
            return Ok(());
        };

        let items: Vec<String> = match paths {
            Some(paths) if paths.len() <= MAX_INVALIDATION_PATHS => {
                paths.iter().map(|p| format!("/{p}")).collect()
            }
            _ => vec!["/*".to_string()],
        };
        if items.is_empty() {
            return Ok(());
        }

        let batch = aws_sdk_cloudfront::types::InvalidationBatch::builder()
            .paths(
                aws_sdk_cloudfront::types::Paths::builder()
                    .quantity(items.len() as i32)
                    .set_items(Some(items))
                    .build()
                    .map_err(|e| StorageError::S3(Box::new(e)))?,
            )
            .caller_reference(Uuid::new_v4().to_string())
            .build()
            .map_err(|e| StorageError::S3(Box::new(e)))?;

        // Best-effort: a failed invalidation only delays edge-cache expiry.
        if let Err(e) = client
            .create_invalidation()
            .distribution_id(distribution_id)
            .invalidation_batch(batch)
            .send()
            .await
        {
            warn!(error = %e, "cloudfront invalidation failed");
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
