pub mod events;
pub mod jobs;
pub mod ocr;
pub mod preprocess;
pub mod queue;
pub mod recognition;
pub mod store;
pub mod tesseract;
pub mod worker;
