//! Task routing.

use crate::chat::core::task::{Task, TaskType};
use crate::chat::storage::Node;

/// Handler a task is dispatched to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    /// Retrieval plus synthesis.
    Inquiry,
    /// Listing only.
    DocumentSearch,
    /// Email the latest summary.
    Email,
    /// Free-form chat; also the default branch.
    General,
}

impl Route {
    /// Pick the handler for `task`. Unknown task types fall back to general chat.
    #[must_use]
    pub const fn for_task(task: &Task) -> Self {
        match task.task_type {
            TaskType::Inquiry => Self::Inquiry,
            TaskType::FindDocuments => Self::DocumentSearch,
            TaskType::SendEmail => Self::Email,
            TaskType::General | TaskType::Unknown => Self::General,
        }
    }

    /// Checkpoint node of the handler.
    #[must_use]
    pub const fn node(self) -> Node {
        match self {
            Self::Inquiry => Node::InquiryHandler,
            Self::DocumentSearch => Node::DocumentSearchHandler,
            Self::Email => Node::EmailHandler,
            Self::General => Node::GeneralHandler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(task_type: TaskType) -> Task {
        Task {
            task_type,
            ..Task::general()
        }
    }

    #[test]
    fn test_each_type_has_one_route() {
        assert_eq!(Route::for_task(&task(TaskType::Inquiry)), Route::Inquiry);
        assert_eq!(Route::for_task(&task(TaskType::FindDocuments)), Route::DocumentSearch);
        assert_eq!(Route::for_task(&task(TaskType::SendEmail)), Route::Email);
        assert_eq!(Route::for_task(&task(TaskType::General)), Route::General);
    }

    #[test]
    fn test_unknown_falls_back_to_general() {
        let route = Route::for_task(&task(TaskType::Unknown));
        assert_eq!(route, Route::General);
        assert_eq!(route.node(), Node::GeneralHandler);
    }
}
