pub mod history;
pub mod peers;
pub mod recommendation;
pub mod serving;
pub mod snapshot;
pub mod status;
pub mod store;
pub mod training;
