pub mod vault_mock;

pub use vault_mock::MockVault;
