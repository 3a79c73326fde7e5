pub mod linked_account;
pub mod transaction;
