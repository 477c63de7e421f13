pub mod assessment;
pub mod extraction;
pub mod pipeline;
pub mod plugins;
pub mod prompts;
