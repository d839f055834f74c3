pub mod config;
pub mod error;
pub mod profile;
pub mod prober;
pub mod media;
pub mod queue;
pub mod reader;
pub mod library;
pub mod driver;
pub mod scan;

pub use config::{CollisionPolicy, ConversionOptions, ConverterConfig};
pub use error::{ConverterError, MediaProbeError, ProfileError, ProfileValidationError, QueueError};
pub use profile::{Preset, ProfileStore};
pub use prober::{MediaInfo, Prober};
pub use media::{ConversionStatus, MediaItem};
pub use queue::{InvalidFile, MediaQueue, PopulateEvent, PopulateOutcome};
pub use reader::OutputReader;
pub use library::{ConversionLib, ConverterState, LibraryEvent};
pub use driver::{ConversionDriver, DriverEvent, DriverHandle, DriverState};
