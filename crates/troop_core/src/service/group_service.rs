//! Group hierarchy use-case service.
//!
//! # Responsibility
//! - Validate hierarchy invariants above the repository layer.
//! - Provide group create, rename, move and role operations.
//!
//! # Invariants
//! - Parent group must exist and be active when provided.
//! - Move operations must not create parent-child cycles.

use crate::access::Role;
use crate::model::group::{Group, GroupId};
use crate::model::person::PersonId;
use crate::repo::group_repo::GroupRepository;
use crate::repo::RepoError;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Errors from group service operations.
#[derive(Debug)]
pub enum GroupServiceError {
    /// Group name is blank after trim.
    InvalidName,
    /// Target group does not exist.
    GroupNotFound(GroupId),
    /// Parent group does not exist.
    ParentNotFound(GroupId),
    /// Move operation would create a cycle.
    CycleDetected {
        group_uuid: GroupId,
        parent_uuid: GroupId,
    },
    /// Repository-level failure.
    Repo(RepoError),
}

impl Display for GroupServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName => write!(f, "group name must not be blank"),
            Self::GroupNotFound(id) => write!(f, "group not found: {id}"),
            Self::ParentNotFound(id) => write!(f, "parent group not found: {id}"),
            Self::CycleDetected {
                group_uuid,
                parent_uuid,
            } => write!(
                f,
                "move would create cycle: group {group_uuid} under parent {parent_uuid}"
            ),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GroupServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for GroupServiceError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

/// Group hierarchy service facade.
pub struct GroupService<R: GroupRepository> {
    repo: R,
}

impl<R: GroupRepository> GroupService<R> {
    /// Creates service from repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates one group under optional parent.
    pub fn create_group(
        &self,
        parent_uuid: Option<GroupId>,
        name: impl Into<String>,
    ) -> Result<Group, GroupServiceError> {
        let normalized = normalize_name(name.into())?;
        if let Some(parent_uuid) = parent_uuid {
            self.ensure_parent_exists(parent_uuid)?;
        }

        let group = Group::new(normalized, parent_uuid);
        self.repo.create_group(&group)?;
        Ok(group)
    }

    /// Renames one group.
    pub fn rename_group(
        &self,
        group_uuid: GroupId,
        name: impl Into<String>,
    ) -> Result<Group, GroupServiceError> {
        let normalized = normalize_name(name.into())?;
        let mut group = self.ensure_group_exists(group_uuid)?;
        group.name = normalized;
        self.repo.update_group(&group)?;
        Ok(group)
    }

    /// Moves one group under optional new parent.
    pub fn move_group(
        &self,
        group_uuid: GroupId,
        new_parent_uuid: Option<GroupId>,
    ) -> Result<Group, GroupServiceError> {
        let mut group = self.ensure_group_exists(group_uuid)?;

        if let Some(parent_uuid) = new_parent_uuid {
            if parent_uuid == group_uuid {
                return Err(GroupServiceError::CycleDetected {
                    group_uuid,
                    parent_uuid,
                });
            }

            self.ensure_parent_exists(parent_uuid)?;
            if self.would_create_cycle(group_uuid, parent_uuid)? {
                return Err(GroupServiceError::CycleDetected {
                    group_uuid,
                    parent_uuid,
                });
            }
        }

        group.parent_uuid = new_parent_uuid;
        self.repo.update_group(&group)?;
        Ok(group)
    }

    /// Lists direct children of optional parent group.
    pub fn list_children(
        &self,
        parent_uuid: Option<GroupId>,
    ) -> Result<Vec<Group>, GroupServiceError> {
        self.repo.list_children(parent_uuid, false).map_err(Into::into)
    }

    /// Soft-deletes a group; descendants and role rows stay for history.
    pub fn delete_group(&self, group_uuid: GroupId) -> Result<(), GroupServiceError> {
        self.ensure_group_exists(group_uuid)?;
        self.repo.soft_delete_group(group_uuid)?;
        Ok(())
    }

    /// Grants one role to a person in a group.
    pub fn grant_role(
        &self,
        person_uuid: PersonId,
        group_uuid: GroupId,
        role: Role,
    ) -> Result<(), GroupServiceError> {
        self.ensure_group_exists(group_uuid)?;
        self.repo.grant_role(person_uuid, group_uuid, role)?;
        Ok(())
    }

    /// Revokes one role from a person in a group.
    pub fn revoke_role(
        &self,
        person_uuid: PersonId,
        group_uuid: GroupId,
        role: Role,
    ) -> Result<(), GroupServiceError> {
        self.repo.revoke_role(person_uuid, group_uuid, role)?;
        Ok(())
    }

    fn ensure_group_exists(&self, group_uuid: GroupId) -> Result<Group, GroupServiceError> {
        self.repo
            .get_group(group_uuid, false)?
            .ok_or(GroupServiceError::GroupNotFound(group_uuid))
    }

    fn ensure_parent_exists(&self, parent_uuid: GroupId) -> Result<Group, GroupServiceError> {
        self.repo
            .get_group(parent_uuid, false)?
            .ok_or(GroupServiceError::ParentNotFound(parent_uuid))
    }

    fn would_create_cycle(
        &self,
        group_uuid: GroupId,
        candidate_parent_uuid: GroupId,
    ) -> Result<bool, GroupServiceError> {
        let mut visited = HashSet::new();
        let mut cursor = Some(candidate_parent_uuid);
        while let Some(current) = cursor {
            if current == group_uuid {
                return Ok(true);
            }
            if !visited.insert(current) {
                return Ok(true);
            }

            let group = self
                .repo
                .get_group(current, false)?
                .ok_or(GroupServiceError::ParentNotFound(current))?;
            cursor = group.parent_uuid;
        }
        Ok(false)
    }
}

fn normalize_name(value: String) -> Result<String, GroupServiceError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GroupServiceError::InvalidName);
    }
    Ok(trimmed.to_string())
}
