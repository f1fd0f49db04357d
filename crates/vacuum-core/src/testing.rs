//! Fake artifacts for unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use crate::artifact::{Artifact, ArtifactError};

#[derive(Debug, Clone)]
pub struct FakeArtifact {
    path: String,
    sha256: Option<String>,
    fail_delete: bool,
    deleted: Rc<RefCell<Vec<String>>>,
}

impl FakeArtifact {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            sha256: None,
            fail_delete: false,
            deleted: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn with_sha256(mut self, sha256: &str) -> Self {
        self.sha256 = Some(sha256.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn recording(mut self, log: &Rc<RefCell<Vec<String>>>) -> Self {
        self.deleted = Rc::clone(log);
        self
    }
}

impl Artifact for FakeArtifact {
    fn path(&self) -> &str {
        &self.path
    }

    fn sha256(&self) -> Option<String> {
        self.sha256.clone()
    }

    fn delete(&self) -> Result<(), ArtifactError> {
        if self.fail_delete {
            return Err(ArtifactError::Backend {
                path: self.path.clone(),
                message: "injected failure".to_string(),
            });
        }
        self.deleted.borrow_mut().push(self.path.clone());
        Ok(())
    }
}
