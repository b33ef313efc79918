use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::ACCEPT_LANGUAGE, request::Parts, HeaderMap},
};
use std::convert::Infallible;

use jobboard_core::invitation::InvitationStatus;

/// Language used for user-facing messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Locale {
    #[default]
    En,
    Id,
}

impl Locale {
    /// Picks the first supported language from `Accept-Language`.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(raw) = headers.get(ACCEPT_LANGUAGE).and_then(|v| v.to_str().ok()) else {
            return Self::En;
        };
        for tag in raw.split(',') {
            let primary = tag
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .split('-')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            match primary.as_str() {
                "id" | "in" => return Self::Id,
                "en" => return Self::En,
                _ => continue,
            }
        }
        Self::En
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Locale
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(&parts.headers))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Company,
    User,
    Invitation,
    Notification,
    JobListing,
    Application,
    PaymentOrder,
}

impl Entity {
    fn name(self, locale: Locale) -> &'static str {
        match (self, locale) {
            (Self::Company, Locale::En) => "Company",
            (Self::Company, Locale::Id) => "Perusahaan",
            (Self::User, Locale::En) => "User",
            (Self::User, Locale::Id) => "Pengguna",
            (Self::Invitation, Locale::En) => "Invitation",
            (Self::Invitation, Locale::Id) => "Undangan",
            (Self::Notification, Locale::En) => "Notification",
            (Self::Notification, Locale::Id) => "Notifikasi",
            (Self::JobListing, Locale::En) => "Job listing",
            (Self::JobListing, Locale::Id) => "Lowongan",
            (Self::Application, Locale::En) => "Application",
            (Self::Application, Locale::Id) => "Lamaran",
            (Self::PaymentOrder, Locale::En) => "Payment order",
            (Self::PaymentOrder, Locale::Id) => "Pesanan pembayaran",
        }
    }
}

/// Every user-visible sentence the API produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    MissingToken,
    InvalidToken,
    Forbidden,
    NotFound(Entity),
    AlreadyResponded(InvitationStatus),
    DuplicateApplication,
    InsufficientBalance { balance: i64, required: i64 },
    CompanyNotVerified,
    JobLimitReached { max_active_jobs: i64 },
    ListingClosed,
    InvalidTransition,
    AmountMismatch,
    InvalidSignature,
    Validation(&'static str),
    GatewayUnavailable,
    Internal,
    InvitationAnswered(InvitationStatus),
    NotificationsMarked(u64),
    PaymentCredited,
    PaymentAlreadyProcessed,
    PaymentPending,
    PaymentFailed,
    PointsCreditedWhatsApp { company: String, points: i64, order_id: String },
}

impl Message {
    pub fn render(&self, locale: Locale) -> String {
        match locale {
            Locale::En => self.english(),
            Locale::Id => self.indonesian(),
        }
    }

    fn english(&self) -> String {
        match self {
            Self::MissingToken => "Authentication is required.".to_string(),
            Self::InvalidToken => "The access token is invalid or expired.".to_string(),
            Self::Forbidden => "You are not allowed to perform this action.".to_string(),
            Self::NotFound(entity) => format!("{} not found.", entity.name(Locale::En)),
            Self::AlreadyResponded(status) => {
                format!("This invitation has already been {}.", status.as_str())
            }
            Self::DuplicateApplication => "You have already applied to this job.".to_string(),
            Self::InsufficientBalance { balance, required } => format!(
                "Insufficient points: {required} required, {balance} available."
            ),
            Self::CompanyNotVerified => "Your company has not been verified yet.".to_string(),
            Self::JobLimitReached { max_active_jobs } => {
                format!("You can have at most {max_active_jobs} active job posts.")
            }
            Self::ListingClosed => "This job listing is closed.".to_string(),
            Self::InvalidTransition => "The application cannot move to that status.".to_string(),
            Self::AmountMismatch => "The paid amount does not match the order.".to_string(),
            Self::InvalidSignature => "Invalid notification signature.".to_string(),
            Self::Validation(field) => format!("The {field} field is invalid."),
            Self::GatewayUnavailable => {
                "The payment provider is unavailable, please try again.".to_string()
            }
            Self::Internal => "Something went wrong, please try again.".to_string(),
            Self::InvitationAnswered(status) => {
                format!("Invitation {} successfully.", status.as_str())
            }
            Self::NotificationsMarked(count) => format!("{count} notifications marked as read."),
            Self::PaymentCredited => "Payment received and points credited.".to_string(),
            Self::PaymentAlreadyProcessed => "Payment was already processed.".to_string(),
            Self::PaymentPending => "Payment is pending.".to_string(),
            Self::PaymentFailed => "Payment failed.".to_string(),
            Self::PointsCreditedWhatsApp {
                company,
                points,
                order_id,
            } => format!(
                "Hi {company}, your payment for order {order_id} was received. \
                 {points} points have been added to your balance."
            ),
        }
    }

    fn indonesian(&self) -> String {
        match self {
            Self::MissingToken => "Autentikasi diperlukan.".to_string(),
            Self::InvalidToken => "Token akses tidak valid atau sudah kedaluwarsa.".to_string(),
            Self::Forbidden => "Anda tidak diizinkan melakukan tindakan ini.".to_string(),
            Self::NotFound(entity) => format!("{} tidak ditemukan.", entity.name(Locale::Id)),
            Self::AlreadyResponded(status) => {
                format!("Undangan ini sudah {}.", status_id(*status))
            }
            Self::DuplicateApplication => "Anda sudah melamar lowongan ini.".to_string(),
            Self::InsufficientBalance { balance, required } => format!(
                "Poin tidak cukup: dibutuhkan {required}, tersedia {balance}."
            ),
            Self::CompanyNotVerified => "Perusahaan Anda belum diverifikasi.".to_string(),
            Self::JobLimitReached { max_active_jobs } => {
                format!("Maksimal {max_active_jobs} lowongan aktif.")
            }
            Self::ListingClosed => "Lowongan ini sudah ditutup.".to_string(),
            Self::InvalidTransition => "Status lamaran tidak dapat diubah ke status tersebut.".to_string(),
            Self::AmountMismatch => "Jumlah pembayaran tidak sesuai dengan pesanan.".to_string(),
            Self::InvalidSignature => "Tanda tangan notifikasi tidak valid.".to_string(),
            Self::Validation(field) => format!("Kolom {field} tidak valid."),
            Self::GatewayUnavailable => {
                "Penyedia pembayaran tidak tersedia, silakan coba lagi.".to_string()
            }
            Self::Internal => "Terjadi kesalahan, silakan coba lagi.".to_string(),
            Self::InvitationAnswered(status) => {
                format!("Undangan berhasil {}.", status_id(*status))
            }
            Self::NotificationsMarked(count) => {
                format!("{count} notifikasi ditandai sudah dibaca.")
            }
            Self::PaymentCredited => "Pembayaran diterima dan poin ditambahkan.".to_string(),
            Self::PaymentAlreadyProcessed => "Pembayaran sudah diproses sebelumnya.".to_string(),
            Self::PaymentPending => "Pembayaran sedang diproses.".to_string(),
            Self::PaymentFailed => "Pembayaran gagal.".to_string(),
            Self::PointsCreditedWhatsApp {
                company,
                points,
                order_id,
            } => format!(
                "Halo {company}, pembayaran untuk pesanan {order_id} sudah kami terima. \
                 {points} poin telah ditambahkan ke saldo Anda."
            ),
        }
    }
}

fn status_id(status: InvitationStatus) -> &'static str {
    match status {
        InvitationStatus::Pending => "menunggu",
        InvitationStatus::Accepted => "diterima",
        InvitationStatus::Declined => "ditolak",
    }
}
