pub mod apps;
pub mod deployments;
pub mod versions;

pub use apps::{app_status, Engine, InstallRequest, NamespaceLister, PostCreateHook, StaticNamespaces};
pub use deployments::DeployWorker;
pub use versions::SetVersionRequest;
