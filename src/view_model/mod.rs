//! 展示层
//!
//! 只读取已提交的实体状态，操作全部委托回编排层

pub mod file_progress_item;
pub mod file_progress_list;

pub use file_progress_item::{FileProgressItemViewModel, Icon, ItemState};
pub use file_progress_list::{
    FileProgressListDelegate, FileProgressListViewModel, ListState, ListSummary,
};
