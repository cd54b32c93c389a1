/*!

Typed descriptions of the AWS resources that make up an EKS stack: a VPC, the IAM roles and OIDC
provider, the cluster and its VPC CNI add-on, and a managed node group launched from a launch
template. Also holds the pieces those resources are assembled from: trust policies, node user
data, the VPC address plan and the stack configuration file.

!*/

pub mod arn;
pub mod config;
mod error;
pub mod kinds;
pub mod network;
pub mod trust;
pub mod userdata;

pub use arn::Arn;
pub use config::{NodeReplacementPolicy, StackConfig};
pub use error::{Error, Result};
