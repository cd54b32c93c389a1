use super::check_name;
use crate::userdata;
use configuration_derive::Configuration;
use serde::{Deserialize, Serialize};
use stack_model::{Output, Resource, ResourceKind};

/// A versioned EC2 launch template. Changing the template data adds a version; the template keeps
/// its id and name.
pub struct LaunchTemplate;

impl ResourceKind for LaunchTemplate {
    const TYPE: &'static str = "aws:ec2:LaunchTemplate";
    const REPLACE_ON_CHANGES: &'static [&'static str] = &["/launchTemplateName"];

    type Args = LaunchTemplateArgs;
    type Attributes = LaunchTemplateAttributes;

    fn validate(args: &LaunchTemplateArgs) -> Result<(), String> {
        if let Some(name) = &args.launch_template_name {
            check_name("launch template name", name, 128)?;
        }
        let data = &args.launch_template_data;
        if !data.image_id.starts_with("ami-") {
            return Err(format!("'{}' is not an AMI id", data.image_id));
        }
        if data.instance_type.is_empty() {
            return Err("an instance type is required".to_string());
        }
        if let Some(user_data) = &data.user_data {
            userdata::decode(user_data).map_err(|e| e.to_string())?;
        }
        for mapping in &data.block_device_mappings {
            if !mapping.device_name.starts_with("/dev/") {
                return Err(format!("'{}' is not a device name", mapping.device_name));
            }
            if let Some(ebs) = &mapping.ebs {
                if ebs.volume_size < 1 {
                    return Err(format!(
                        "volume size for {} must be positive",
                        mapping.device_name
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch_template_name: Option<String>,
    pub launch_template_data: LaunchTemplateData,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateData {
    pub instance_type: String,
    pub image_id: String,
    /// Base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
    #[serde(default)]
    pub block_device_mappings: Vec<BlockDeviceMapping>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockDeviceMapping {
    pub device_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ebs: Option<Ebs>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ebs {
    pub volume_type: String,
    pub volume_size: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throughput: Option<i32>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize, Configuration)]
#[serde(rename_all = "camelCase")]
pub struct LaunchTemplateAttributes {
    pub launch_template_id: String,
    pub launch_template_name: String,
    pub default_version_number: String,
    pub latest_version_number: String,
}

pub trait LaunchTemplateOutputs {
    fn launch_template_id(&self) -> Output<String>;
    fn launch_template_name(&self) -> Output<String>;
    fn latest_version_number(&self) -> Output<String>;
}

impl LaunchTemplateOutputs for Resource<LaunchTemplate> {
    fn launch_template_id(&self) -> Output<String> {
        self.attribute("launchTemplateId")
    }

    fn launch_template_name(&self) -> Output<String> {
        self.attribute("launchTemplateName")
    }

    fn latest_version_number(&self) -> Output<String> {
        self.attribute("latestVersionNumber")
    }
}

#[cfg(test)]
mod test {
    use super::{BlockDeviceMapping, Ebs, LaunchTemplate, LaunchTemplateArgs, LaunchTemplateData};
    use crate::userdata;
    use stack_model::ResourceKind;

    #[test]
    fn user_data_must_be_base64() {
        let mut args = LaunchTemplateArgs {
            launch_template_name: None,
            launch_template_data: LaunchTemplateData {
                instance_type: "m5.large".to_string(),
                image_id: "ami-02561a005c32adc67".to_string(),
                user_data: Some(userdata::encode("eks-1747")),
                security_group_ids: vec!["sg-1".to_string()],
                block_device_mappings: vec![BlockDeviceMapping {
                    device_name: "/dev/xvda".to_string(),
                    ebs: Some(Ebs {
                        volume_type: "gp3".to_string(),
                        volume_size: 80,
                        iops: Some(3000),
                        throughput: Some(125),
                    }),
                }],
            },
        };
        LaunchTemplate::validate(&args).unwrap();
        args.launch_template_data.user_data = Some("#!/bin/bash".to_string());
        assert!(LaunchTemplate::validate(&args).is_err());
    }
}
