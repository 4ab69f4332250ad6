//! Error types for Granary container operations.
//!
//! Granary provides detailed, actionable error messages.
//! No more `BeanNotFound: 0x7f3a2b1c`.

use std::fmt;

use granary_support::rendering::render_chain;

/// Upper bound on suppressed failures carried by a [`CreationFailedError`].
///
/// The 101st and later suppressed failures are dropped silently.
pub const MAX_SUPPRESSED: usize = 100;

/// Main error type for all Granary operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ContainerError {
    /// Requested name has no definition and no registered singleton.
    #[error("{}", .0)]
    NoSuchBean(NoSuchBeanError),

    /// A by-type query matched more than one bean.
    #[error("{}", .0)]
    NoUniqueBean(NoUniqueBeanError),

    /// Resolved instance is not assignable to the requested type.
    #[error("{}", .0)]
    NotOfRequiredType(NotOfRequiredTypeError),

    /// Circular reference that cannot be broken by an early reference.
    #[error("{}", .0)]
    CurrentlyInCreation(CurrentlyInCreationError),

    /// Singleton lookup while the registry is destroying its singletons.
    #[error(
        "Singleton bean '{bean_name}' cannot be created while the singletons \
         of this registry are being destroyed\n  \
         Hint: do not request beans from a destroy hook; use the beans captured at creation time"
    )]
    CreationNotAllowed {
        /// The bean that was requested during destruction
        bean_name: String,
    },

    /// A user factory, init hook, or post-processor failed.
    #[error("{}", .0)]
    CreationFailed(CreationFailedError),

    /// Structural problem with a bean definition.
    #[error("{}", .0)]
    DefinitionStore(DefinitionStoreError),

    /// Invariant violation (e.g. setting the parent factory twice).
    #[error("{message}")]
    IllegalState {
        /// What invariant was violated
        message: String,
    },
}

impl ContainerError {
    /// Shorthand for an [`ContainerError::IllegalState`].
    pub fn illegal_state(message: impl Into<String>) -> Self {
        ContainerError::IllegalState {
            message: message.into(),
        }
    }

    /// Shorthand for a [`ContainerError::DefinitionStore`].
    pub fn definition_store(bean_name: impl Into<String>, message: impl Into<String>) -> Self {
        ContainerError::DefinitionStore(DefinitionStoreError {
            bean_name: bean_name.into(),
            message: message.into(),
        })
    }

    /// Shorthand for a [`ContainerError::CurrentlyInCreation`] without a chain.
    pub fn currently_in_creation(bean_name: impl Into<String>) -> Self {
        ContainerError::CurrentlyInCreation(CurrentlyInCreationError {
            bean_name: bean_name.into(),
            chain: Vec::new(),
        })
    }

    /// Wraps a cause into a [`ContainerError::CreationFailed`] for `bean_name`.
    pub fn creation_failed(
        bean_name: impl Into<String>,
        message: impl Into<String>,
        source: Option<ContainerError>,
    ) -> Self {
        ContainerError::CreationFailed(CreationFailedError {
            bean_name: bean_name.into(),
            message: message.into(),
            source: source.map(Box::new),
            suppressed: Vec::new(),
        })
    }

    /// The bean name this error is about, when it carries one.
    pub fn bean_name(&self) -> Option<&str> {
        match self {
            ContainerError::NoSuchBean(e) => Some(&e.bean_name),
            ContainerError::NotOfRequiredType(e) => Some(&e.bean_name),
            ContainerError::CurrentlyInCreation(e) => Some(&e.bean_name),
            ContainerError::CreationNotAllowed { bean_name } => Some(bean_name),
            ContainerError::CreationFailed(e) => Some(&e.bean_name),
            ContainerError::DefinitionStore(e) => Some(&e.bean_name),
            ContainerError::NoUniqueBean(_) | ContainerError::IllegalState { .. } => None,
        }
    }
}

/// Error when a bean name resolves to nothing.
///
/// Includes "did you mean?" suggestions when close names are registered.
#[derive(Debug, Clone)]
pub struct NoSuchBeanError {
    /// The name that was requested
    pub bean_name: String,
    /// Registered names that look similar
    pub suggestions: Vec<String>,
}

impl fmt::Display for NoSuchBeanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "No bean named '{}' is defined", self.bean_name)?;

        if !self.suggestions.is_empty() {
            write!(f, "\n  Did you mean one of:")?;
            for suggestion in &self.suggestions {
                write!(f, "\n    - {suggestion}")?;
            }
        }

        write!(
            f,
            "\n  Hint: register a definition or singleton under '{}' before looking it up",
            self.bean_name
        )
    }
}

/// Error when a by-type query matches more than one bean.
#[derive(Debug, Clone)]
pub struct NoUniqueBeanError {
    /// The requested type
    pub type_name: String,
    /// All matching bean names
    pub candidates: Vec<String>,
}

impl fmt::Display for NoUniqueBeanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No qualifying bean of type '{}': expected single matching bean but found {}: {}",
            self.type_name,
            self.candidates.len(),
            self.candidates.join(", "),
        )?;
        write!(f, "\n  Hint: look the bean up by name instead")
    }
}

/// Error when the resolved instance has the wrong type.
#[derive(Debug, Clone)]
pub struct NotOfRequiredTypeError {
    /// The bean that was resolved
    pub bean_name: String,
    /// The requested type
    pub required: String,
    /// The type that was actually found, when it can be named
    pub actual: Option<String>,
}

impl fmt::Display for NotOfRequiredTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bean named '{}' is expected to be of type '{}'",
            self.bean_name, self.required,
        )?;
        match &self.actual {
            Some(actual) => write!(f, " but was actually of type '{actual}'"),
            None => write!(f, " but the resolved instance is not assignable to it"),
        }
    }
}

/// Error when a circular reference cannot be broken.
///
/// Shows the creation chain so you can see WHERE the cycle is.
#[derive(Debug, Clone)]
pub struct CurrentlyInCreationError {
    /// The bean whose creation re-entered
    pub bean_name: String,
    /// The creation chain leading to the cycle, when known.
    /// Example: `["a", "b", "a"]`
    pub chain: Vec<String>,
}

impl fmt::Display for CurrentlyInCreationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bean '{}' is currently in creation: unresolvable circular reference",
            self.bean_name
        )?;

        if !self.chain.is_empty() {
            write!(f, "\n  {}", render_chain(&self.chain))?;
        }

        write!(
            f,
            "\n  Hint: break the cycle with a late-bound field on a singleton participant"
        )
    }
}

/// Error raised when a user factory, init hook, or post-processor failed.
///
/// Carries the failures suppressed during the creation frame as related
/// causes, bounded at [`MAX_SUPPRESSED`].
#[derive(Debug, Clone)]
pub struct CreationFailedError {
    /// The bean whose creation failed
    pub bean_name: String,
    /// Which creation stage failed
    pub message: String,
    /// The underlying failure, if any
    pub source: Option<Box<ContainerError>>,
    /// Related failures collected while this creation frame was active
    pub suppressed: Vec<ContainerError>,
}

impl fmt::Display for CreationFailedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error creating bean '{}': {}",
            self.bean_name, self.message
        )?;

        if let Some(ref source) = self.source {
            write!(f, "\n  Caused by: {source}")?;
        }

        if !self.suppressed.is_empty() {
            write!(
                f,
                "\n  {} related failure(s) were suppressed during creation",
                self.suppressed.len()
            )?;
        }

        Ok(())
    }
}

/// Error for structural problems with a bean definition.
#[derive(Debug, Clone)]
pub struct DefinitionStoreError {
    /// The definition in question
    pub bean_name: String,
    /// What is wrong with it
    pub message: String,
}

impl fmt::Display for DefinitionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid bean definition '{}': {}",
            self.bean_name, self.message,
        )
    }
}

/// Convenient Result type for Granary operations.
pub type Result<T> = std::result::Result<T, ContainerError>;
