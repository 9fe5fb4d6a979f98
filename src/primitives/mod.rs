pub mod merkle;
pub mod prime;
pub mod rsa_group;

pub use prime::Prime;
pub use rsa_group::RsaGroup;
