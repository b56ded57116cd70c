pub mod cloud;
pub mod facts;
pub mod report;

pub use cloud::handle_cloud_command;
pub use facts::handle_facts_command;
pub use report::handle_report_command;
