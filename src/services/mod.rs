pub mod dispatcher;
pub mod in_flight;
pub mod recovery;
pub mod scheduler;
pub mod worker;
