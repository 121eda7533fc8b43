//! Repository implementations

mod api_key;
mod certificate;

pub use api_key::PgApiKeyRepository;
pub use certificate::PgCertificateRepository;
