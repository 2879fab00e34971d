use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use log::info;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::user_repository::{KycStatus, UserRepository};

const THUMBNAIL_SIZE: u32 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Identity,
    Address,
}

impl DocumentKind {
    pub fn as_str(&self) -> &str {
        match self {
            DocumentKind::Identity => "identity",
            DocumentKind::Address => "address",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "identity" => Ok(DocumentKind::Identity),
            "address" => Ok(DocumentKind::Address),
            _ => Err(format!("Invalid document kind: {}", s)),
        }
    }
}

/// Next verification stage after a document of `kind` lands while the profile
/// sits at `current`. Once both documents are in, the case goes under review.
pub fn advance_kyc(current: KycStatus, kind: DocumentKind) -> Result<KycStatus, ApiError> {
    match (current, kind) {
        (KycStatus::NotStarted, DocumentKind::Identity) => Ok(KycStatus::IdentitySubmitted),
        (KycStatus::NotStarted, DocumentKind::Address) => Ok(KycStatus::AddressSubmitted),
        (KycStatus::IdentitySubmitted, DocumentKind::Address) => Ok(KycStatus::UnderReview),
        (KycStatus::AddressSubmitted, DocumentKind::Identity) => Ok(KycStatus::UnderReview),
        (KycStatus::IdentitySubmitted, DocumentKind::Identity)
        | (KycStatus::AddressSubmitted, DocumentKind::Address) => Ok(current),
        (KycStatus::Rejected, _) => match kind {
            DocumentKind::Identity => Ok(KycStatus::IdentitySubmitted),
            DocumentKind::Address => Ok(KycStatus::AddressSubmitted),
        },
        (KycStatus::UnderReview, _) | (KycStatus::Verified, _) => Err(ApiError::Conflict(
            "KYC verification is already in progress".to_string(),
        )),
    }
}

/// Strips a `data:<mime>;base64,` prefix if present and decodes the payload.
pub fn decode_data_url(data: &str) -> Result<Vec<u8>, ApiError> {
    let payload = match data.split_once(";base64,") {
        Some((_, encoded)) => encoded,
        None => data,
    };
    general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::validation("Invalid document encoding"))
}

#[derive(Debug, Serialize)]
pub struct KycUploadResult {
    pub kind: String,
    pub kyc_status: String,
    pub stored_at: String,
}

pub struct KycService {
    user_repository: Arc<UserRepository>,
    documents_dir: PathBuf,
}

impl KycService {
    pub fn new(user_repository: Arc<UserRepository>, documents_dir: &str) -> Self {
        KycService {
            user_repository,
            documents_dir: PathBuf::from(documents_dir),
        }
    }

    /// Accepts a base64 data URL, verifies it decodes to an image, stores the
    /// original plus a thumbnail, and advances the verification stage.
    pub fn upload_document(
        &self,
        user: Uuid,
        kind: DocumentKind,
        data: &str,
    ) -> Result<KycUploadResult, ApiError> {
        let bytes = decode_data_url(data)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|_| ApiError::validation("Document is not a valid image"))?;

        let profile = self
            .user_repository
            .get_profile(user)?
            .ok_or_else(|| ApiError::not_found("Profile not found"))?;
        let current = KycStatus::from_str(&profile.kyc_status)
            .map_err(ApiError::Internal)?;
        let next = advance_kyc(current, kind)?;

        let folder = self.documents_dir.join(user.to_string());
        if !Path::new(&folder).exists() {
            fs::create_dir_all(&folder).map_err(|err| ApiError::Internal(err.to_string()))?;
        }
        let original_path = folder.join(format!("{}.png", kind.as_str()));
        let thumb_path = folder.join(format!("{}_thumb.png", kind.as_str()));

        let mut original = Cursor::new(Vec::new());
        img.write_to(&mut original, ImageFormat::Png)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        fs::write(&original_path, original.into_inner())
            .map_err(|err| ApiError::Internal(err.to_string()))?;

        let thumbnail = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
        let mut thumb = Cursor::new(Vec::new());
        thumbnail
            .write_to(&mut thumb, ImageFormat::Png)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        fs::write(&thumb_path, thumb.into_inner())
            .map_err(|err| ApiError::Internal(err.to_string()))?;

        self.user_repository.set_kyc_status(user, next)?;
        info!(
            "Stored {} document for user {}, status {}",
            kind.as_str(),
            user,
            next.as_str()
        );
        Ok(KycUploadResult {
            kind: kind.as_str().to_string(),
            kyc_status: next.as_str().to_string(),
            stored_at: original_path.to_string_lossy().into_owned(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_walk_the_submission_stages() {
        assert_eq!(
            advance_kyc(KycStatus::NotStarted, DocumentKind::Identity).unwrap(),
            KycStatus::IdentitySubmitted
        );
        assert_eq!(
            advance_kyc(KycStatus::IdentitySubmitted, DocumentKind::Address).unwrap(),
            KycStatus::UnderReview
        );
        assert_eq!(
            advance_kyc(KycStatus::NotStarted, DocumentKind::Address).unwrap(),
            KycStatus::AddressSubmitted
        );
        assert_eq!(
            advance_kyc(KycStatus::AddressSubmitted, DocumentKind::Identity).unwrap(),
            KycStatus::UnderReview
        );
    }

    #[test]
    fn should_allow_resubmitting_the_same_document() {
        assert_eq!(
            advance_kyc(KycStatus::IdentitySubmitted, DocumentKind::Identity).unwrap(),
            KycStatus::IdentitySubmitted
        );
    }

    #[test]
    fn should_reopen_after_rejection() {
        assert_eq!(
            advance_kyc(KycStatus::Rejected, DocumentKind::Identity).unwrap(),
            KycStatus::IdentitySubmitted
        );
    }

    #[test]
    fn should_refuse_uploads_once_under_review() {
        assert!(advance_kyc(KycStatus::UnderReview, DocumentKind::Identity).is_err());
        assert!(advance_kyc(KycStatus::Verified, DocumentKind::Address).is_err());
    }

    #[test]
    fn should_decode_data_urls_with_and_without_prefix() {
        let encoded = general_purpose::STANDARD.encode(b"hello");
        let with_prefix = format!("data:image/png;base64,{}", encoded);
        assert_eq!(decode_data_url(&with_prefix).unwrap(), b"hello");
        assert_eq!(decode_data_url(&encoded).unwrap(), b"hello");
        assert!(decode_data_url("!!!not-base64!!!").is_err());
    }
}
