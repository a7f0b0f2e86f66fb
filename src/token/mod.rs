/// Token module
///
/// Encoding, verification, and fingerprinting of the two token kinds:
/// short-lived access tokens and long-lived single-use refresh tokens.

mod claims;
mod codec;

pub use claims::AccessClaims;
pub use claims::RefreshClaims;
pub use codec::TokenCodec;
