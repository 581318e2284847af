//! Person use-case service.
//!
//! # Responsibility
//! - Provide stable CRUD entry points for core callers.
//! - Delegate persistence to repository implementations.
//!
//! # Invariants
//! - Service APIs never bypass repository validation contracts.
//! - Service layer remains storage-agnostic.

use crate::model::person::{Person, PersonId};
use crate::repo::person_repo::{PersonListQuery, PersonRepository};
use crate::repo::RepoResult;

/// Use-case service wrapper for person CRUD operations.
pub struct PersonService<R: PersonRepository> {
    repo: R,
}

impl<R: PersonRepository> PersonService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Creates a new person through repository persistence.
    pub fn create_person(&self, person: &Person) -> RepoResult<PersonId> {
        self.repo.create_person(person)
    }

    /// Creates a person from bare name input.
    pub fn create_member(
        &self,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> RepoResult<PersonId> {
        let person = Person::new(first_name, last_name);
        self.repo.create_person(&person)
    }

    /// Updates an existing person by stable ID.
    ///
    /// Returns repository-level not-found or validation errors unchanged.
    pub fn update_person(&self, person: &Person) -> RepoResult<()> {
        self.repo.update_person(person)
    }

    /// Gets one person by ID with optional deleted-row visibility.
    pub fn get_person(&self, id: PersonId, include_deleted: bool) -> RepoResult<Option<Person>> {
        self.repo.get_person(id, include_deleted)
    }

    /// Lists people using pagination options.
    pub fn list_people(&self, query: &PersonListQuery) -> RepoResult<Vec<Person>> {
        self.repo.list_people(query)
    }

    /// Soft-deletes a person by ID.
    pub fn soft_delete_person(&self, id: PersonId) -> RepoResult<()> {
        self.repo.soft_delete_person(id)
    }
}
