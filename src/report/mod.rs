mod export;
mod formatter;

pub use export::save_report;
pub use formatter::{format, Report};
