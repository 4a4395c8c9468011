/*
 * xyna/api - the XynaFactoryService custom resource and the types
 * shared between the operator and tooling.
 */

pub mod factoryservice;
pub use factoryservice::AppSpec;
pub use factoryservice::FactoryState;
pub use factoryservice::NodeLabel;
pub use factoryservice::PortSpec;
pub use factoryservice::XynaFactoryService;
pub use factoryservice::XynaFactoryServiceSpec;
pub use factoryservice::XynaFactoryServiceStatus;
pub use factoryservice::install_order;
