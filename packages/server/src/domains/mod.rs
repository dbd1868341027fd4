// Business domains
pub mod automations;
pub mod followups;
pub mod seeds;
