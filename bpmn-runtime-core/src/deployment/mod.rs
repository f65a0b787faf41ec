mod cache;

pub use cache::DeploymentCache;
