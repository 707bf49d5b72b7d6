//! Database entities

pub mod acme_account;
pub mod certificate;
pub mod challenge;
pub mod operation;
pub mod route;

pub use acme_account::Entity as AcmeAccount;
pub use certificate::Entity as Certificate;
pub use challenge::Entity as Challenge;
pub use operation::Entity as Operation;
pub use route::Entity as Route;

pub mod prelude {
    pub use super::acme_account::Entity as AcmeAccount;
    pub use super::certificate::Entity as Certificate;
    pub use super::challenge::Entity as Challenge;
    pub use super::operation::Entity as Operation;
    pub use super::route::Entity as Route;
}
