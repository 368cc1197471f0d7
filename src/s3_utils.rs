// Receipt screenshots on S3-compatible storage.

use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use uuid::Uuid;

#[derive(Clone)]
pub struct ReceiptStorage {
    client: S3Client,
    bucket: String,
    public_base_url: String,
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

impl ReceiptStorage {
    pub fn new(client: S3Client, bucket: String, public_base_url: String) -> Self {
        Self {
            client,
            bucket,
            public_base_url,
        }
    }

    pub async fn put_receipt(
        &self,
        user_id: i32,
        ext: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, String> {
        let key = receipt_key(user_id, Uuid::new_v4(), ext);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let url = build_public_url(&self.public_base_url, &self.bucket, &key);
        Ok(StoredObject { key, url })
    }
}

pub fn receipt_key(user_id: i32, id: Uuid, ext: &str) -> String {
    format!("receipts/{user_id}/{id}.{ext}")
}

pub fn build_public_url(base: &str, bucket: &str, key: &str) -> String {
    let trimmed = base.trim_end_matches('/');

    // https://host/{bucket}/{key}, https://{bucket}.host/{key} or https://{bucket}.host
    if trimmed.contains("{key}") {
        return trimmed.replace("{bucket}", bucket).replace("{key}", key);
    }
    if trimmed.contains("{bucket}") {
        return format!("{}/{}", trimmed.replace("{bucket}", bucket), key);
    }

    if trimmed.contains(bucket) {
        format!("{}/{}", trimmed, key)
    } else {
        format!("{}/{}/{}", trimmed, bucket, key)
    }
}
