//! Value resolvers turning one item attribute into one feed cell.
//!
//! Resolvers are looked up by the `resolver_id` of a [`PropertyBinding`].
//! Three are built in:
//!
//! | id             | renders                                                    |
//! |----------------|------------------------------------------------------------|
//! | `attribute`    | the attribute named by `params.attribute` (or the binding name) |
//! | `categoryName` | the `name` of each category object in the attribute        |
//! | `imageUrl`     | media base URL for `params.siteUid` + the picture URL       |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::MediaUrlConfig;
use crate::error::AppError;
use crate::models::{IndexPlan, Item, PropertyBinding};

pub const ATTRIBUTE_RESOLVER: &str = "attribute";
pub const CATEGORY_NAME_RESOLVER: &str = "categoryName";
pub const IMAGE_URL_RESOLVER: &str = "imageUrl";

const ATTRIBUTE_PARAM: &str = "attribute";
const SITE_UID_PARAM: &str = "siteUid";
const DEFAULT_PICTURE_ATTRIBUTE: &str = "picture";

/// Resolves the value of one property for one item.
///
/// Returned values are rendered by the feed writer: `null` becomes an empty
/// cell and arrays are comma-joined. An `Err` fails generation of the batch.
pub trait ValueResolver: Send + Sync {
    fn resolve(&self, item: &Item, binding: &PropertyBinding) -> Result<Value, AppError>;
}

fn attribute_name(binding: &PropertyBinding) -> &str {
    binding
        .params
        .get(ATTRIBUTE_PARAM)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(&binding.name)
}

/// Renders an item attribute as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttributeResolver;

impl ValueResolver for AttributeResolver {
    fn resolve(&self, item: &Item, binding: &PropertyBinding) -> Result<Value, AppError> {
        Ok(item
            .attribute(attribute_name(binding))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// Renders category references by their `name`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CategoryNameResolver;

impl CategoryNameResolver {
    fn category_name(value: &Value) -> Result<Value, AppError> {
        match value {
            Value::Object(category) => Ok(category.get("name").cloned().unwrap_or(Value::Null)),
            other => Err(AppError::Generic(format!(
                "Value must be a category, got {}",
                other
            ))),
        }
    }
}

impl ValueResolver for CategoryNameResolver {
    fn resolve(&self, item: &Item, binding: &PropertyBinding) -> Result<Value, AppError> {
        match item.attribute(attribute_name(binding)) {
            None | Some(Value::Null) => Ok(Value::Null),
            Some(Value::Array(categories)) => categories
                .iter()
                .map(Self::category_name)
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Some(single) => Self::category_name(single),
        }
    }
}

/// Renders absolute picture URLs.
#[derive(Debug, Clone, Default)]
pub struct ImageUrlResolver {
    media: MediaUrlConfig,
}

impl ImageUrlResolver {
    pub fn new(media: MediaUrlConfig) -> Self {
        Self { media }
    }
}

impl ValueResolver for ImageUrlResolver {
    fn resolve(&self, item: &Item, binding: &PropertyBinding) -> Result<Value, AppError> {
        let attribute = binding
            .params
            .get(ATTRIBUTE_PARAM)
            .map(String::as_str)
            .unwrap_or(DEFAULT_PICTURE_ATTRIBUTE);

        let picture_url = match item.attribute(attribute) {
            Some(Value::String(url)) => Some(url.as_str()),
            Some(Value::Object(media)) => media.get("url").and_then(Value::as_str),
            _ => None,
        }
        .ok_or_else(|| {
            AppError::Generic(format!("Image of item {} cannot be found", item.id))
        })?;

        let site_uid = binding
            .params
            .get(SITE_UID_PARAM)
            .map(String::as_str)
            .filter(|uid| !uid.trim().is_empty());

        Ok(Value::String(format!(
            "{}{}",
            self.media.base_url(site_uid),
            picture_url
        )))
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Resolver implementations keyed by id.
#[derive(Clone, Default)]
pub struct ResolverRegistry {
    resolvers: HashMap<String, Arc<dyn ValueResolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.resolvers.keys().collect();
        ids.sort();
        f.debug_struct("ResolverRegistry").field("ids", &ids).finish()
    }
}

impl ResolverRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in resolvers.
    pub fn with_defaults(media: MediaUrlConfig) -> Self {
        Self::new()
            .register(ATTRIBUTE_RESOLVER, AttributeResolver)
            .register(CATEGORY_NAME_RESOLVER, CategoryNameResolver)
            .register(IMAGE_URL_RESOLVER, ImageUrlResolver::new(media))
    }

    /// Registers (or replaces) a resolver.
    pub fn register(mut self, id: impl Into<String>, resolver: impl ValueResolver + 'static) -> Self {
        self.resolvers.insert(id.into(), Arc::new(resolver));
        self
    }

    /// Looks up a resolver, failing with [`AppError::InvalidResolver`] on unknown ids.
    pub fn get(&self, id: &str) -> Result<&dyn ValueResolver, AppError> {
        self.resolvers
            .get(id)
            .map(|resolver| resolver.as_ref())
            .ok_or_else(|| AppError::InvalidResolver(id.to_string()))
    }

    /// Checks that every binding of a plan names a registered resolver.
    pub fn validate(&self, plan: &IndexPlan) -> Result<(), AppError> {
        plan.properties
            .iter()
            .try_for_each(|binding| self.get(&binding.resolver_id).map(|_| ()))
    }
}
