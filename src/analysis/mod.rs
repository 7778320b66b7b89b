mod controller;
mod error;
mod transport;

pub use controller::{AnalysisController, AnalysisEvent, AnalysisOutcome, OperationHandle};
pub use error::AnalysisError;
pub use transport::{AnalysisTransport, ProxyTransport};
