pub use super::client_session::Entity as ClientSession;
pub use super::data_batch::Entity as DataBatch;
