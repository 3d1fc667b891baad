pub mod lifecycle;
pub mod progress;

pub use lifecycle::{CampaignPatch, LifecycleController, NewAttack, NewCampaign};
