pub mod run;
pub mod settings;

pub use run::RunCommit;
pub use settings::AutomationSettings;
