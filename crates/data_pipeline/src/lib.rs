pub mod collator;
pub mod dataloader;
pub mod dataset;
pub mod device;
pub mod extract;
pub mod sample;
pub mod sampler;
pub mod transform;
pub mod value;

pub use collator::{Batch, BatchCollator, BatchTransform};
pub use dataloader::{DataLoader, LoaderConfig, LoaderConfigBuilder, LoaderIter};
pub use dataset::{Dataset, DatasetMode, InMemoryDataset, SampleStream, StreamDataset};
pub use device::{
    DeviceLane, DevicePlace, HostMaterializer, HostTensor, MultiDeviceLoader, StepBatches,
    TensorMaterializer, TrainStep,
};
pub use extract::{ExtractFields, FeedBatch, FeedRecord, FieldSource, FieldSpec};
pub use sample::{Sample, BATCH_SEED_FIELD};
pub use sampler::{BatchSampler, IndexGroup, RandomSampler, SequentialSampler, StreamSampler};
pub use transform::{SampleTransform, TransformChain};
pub use value::Value;
