//! JSON bodies of the blob-server wire protocol.
//!
//! Responses are pretty-printed with two-space indentation; clients must
//! accept any valid JSON rendering of these shapes.

use serde::{Deserialize, Serialize};

use crate::blobref::{BlobRef, SizedBlobRef};

/// Default cap on a single uploaded blob, reported as `maxUploadSize`.
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 2147483647;

/// How long a handed-out `uploadUrl` stays valid.
pub const UPLOAD_URL_EXPIRATION_SECONDS: u64 = 86400;

/// The `camliType` value identifying a share blob.
pub const CAMLI_TYPE_SHARE: &str = "share";

/// The only share authorization scheme: possession of the ref chain.
pub const AUTH_TYPE_HAVEREF: &str = "haveref";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub max_upload_size: u64,
    pub upload_url_expiration_seconds: u64,
    pub upload_url: String,
    pub received: Vec<SizedBlobRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreuploadResponse {
    pub already_have: Vec<SizedBlobRef>,
    pub max_upload_size: u64,
    pub upload_url: String,
    pub upload_url_expiration_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerateResponse {
    pub blobs: Vec<SizedBlobRef>,
    pub can_long_poll: bool,
    /// Resume cursor: the last emitted blobref, present only when the
    /// listing was truncated at the requested limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<BlobRef>,
}

/// `{}` on success, `{"error": "..."}` on failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The JSON document stored in a share blob.
///
/// Unknown fields are tolerated so shares can carry extra metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBlob {
    pub camli_type: String,
    pub target: BlobRef,
    pub auth_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_blob_parses_with_extra_fields() {
        let json = r#"{
          "camliType": "share",
          "target": "sha1-2aae6c35c94fcfb415dbe95f408b9ce91ee846ed",
          "authType": "haveref",
          "transitive": false
        }"#;
        let share: ShareBlob = serde_json::from_str(json).unwrap();
        assert_eq!(share.camli_type, CAMLI_TYPE_SHARE);
        assert_eq!(share.auth_type, AUTH_TYPE_HAVEREF);
    }

    #[test]
    fn remove_response_is_empty_object_on_success() {
        assert_eq!(
            serde_json::to_string(&RemoveResponse::default()).unwrap(),
            "{}"
        );
    }

    #[test]
    fn enumerate_response_omits_after_when_complete() {
        let resp = EnumerateResponse {
            blobs: vec![],
            can_long_poll: false,
            after: None,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("after"));
    }
}
