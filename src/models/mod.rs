pub mod deploy_config;
pub mod deploy_record;
pub mod host;
pub mod project;

#[allow(unused_imports)]
pub mod prelude {
    pub use super::deploy_config::{self, Entity as DeployConfig};
    pub use super::deploy_record::{self, Entity as DeployRecord};
    pub use super::host::{self, Entity as Host};
    pub use super::project::{self, Entity as Project};
}
