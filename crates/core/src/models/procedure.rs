use serde::{Deserialize, Serialize};

/// 过程定义：Worker运行任务所需的可执行模板
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    pub id: String,
    /// 可执行文件路径（exec工厂）或脚本文件（shell工厂，definition为空时）
    #[serde(default)]
    pub path: String,
    /// shell工厂执行的脚本内容，exec工厂的参数列表
    #[serde(default)]
    pub definition: String,
    /// 默认资源条件，作业未指定时生效
    #[serde(default)]
    pub requirement: String,
}

impl Procedure {
    pub fn shell(id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            definition: definition.into(),
            ..Self::default()
        }
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirement = requirement.into();
        self
    }
}
