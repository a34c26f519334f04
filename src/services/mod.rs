pub mod analysis;
pub mod channel;
pub mod feedback;
pub mod llm;
pub mod materials;
pub mod model_images;
pub mod parser;
pub mod persistence;
pub mod selection;
pub mod suggestions;
pub mod synthesis;
pub mod thumbnail;
pub mod workflow;

#[cfg(test)]
pub(crate) mod test_support;
