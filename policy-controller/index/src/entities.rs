//! Entities selected by policies, and the stores that maintain them.

use crate::{
    denorm,
    evaluate::evaluate_entity,
    events::EventBuffer,
    fields,
    integrity,
    kind::{EntityType, PolicyKind, EDGE_ROUTER_POLICIES, SERVICE_EDGE_ROUTER_POLICIES},
    policy::Policy,
    router, sessions, Index,
};
use overlay_policy_core::{role, Error, Result};
use overlay_policy_store::{Record, State, Tx};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// An entity type that policies can select by id or role attribute.
pub trait Entity: Sized {
    const TYPE: EntityType;

    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn role_attributes(&self) -> &[String];
    fn encode(&self) -> Record;
    fn decode(id: &str, record: &Record) -> Self;

    /// Checks type-specific constraints before the entity is written.
    fn validate(&self, _tx: &Tx<'_>, _prior: Option<&Self>) -> Result<()> {
        Ok(())
    }

    /// Applies type-specific side effects once the entity has been written.
    fn after_persist(
        &self,
        _index: &Index,
        _tx: &mut Tx<'_>,
        _prior: Option<&Self>,
        _events: &mut EventBuffer,
    ) -> Result<()> {
        Ok(())
    }

    fn load(state: &State, id: &str) -> Result<Self> {
        state
            .get(Self::TYPE.bucket(), id)
            .map(|r| Self::decode(id, r))
            .ok_or_else(|| Error::not_found(Self::TYPE.name(), id))
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum IdentityType {
    #[default]
    Default,

    /// The shadow identity of a tunneling edge router.
    Router,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub identity_type: IdentityType,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub role_attributes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeRouter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_tunneler_enabled: bool,
    #[serde(default)]
    pub role_attributes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub encryption_required: bool,
    #[serde(default)]
    pub role_attributes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostureCheck {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub type_id: String,
    #[serde(default)]
    pub role_attributes: Vec<String>,
}

// === impl Index ===

impl Index {
    /// Stores a new entity and links it to every policy it matches.
    pub fn create_entity<E: Entity>(&self, tx: &mut Tx<'_>, entity: E) -> Result<()> {
        validate_common(&entity)?;
        entity.validate(tx, None)?;
        tx.create(E::TYPE.bucket(), entity.id(), entity.encode())?;

        let mut events = EventBuffer::default();
        // Role attribute listeners only fire when the attribute set changes, so an entity created
        // without attributes would never be offered to wildcard policies.
        if entity.role_attributes().is_empty() {
            evaluate_entity(tx, E::TYPE, entity.id(), Some(&[]), &mut events)?;
        }
        entity.after_persist(self, tx, None, &mut events)?;
        events.flush(tx, &self.events);

        info!(entity = %E::TYPE, id = %entity.id(), name = %entity.name(), "Created");
        Ok(())
    }

    /// Replaces an existing entity. Changes to its role attributes are evaluated by the
    /// attribute listener registered in the schema.
    pub fn update_entity<E: Entity>(&self, tx: &mut Tx<'_>, entity: E) -> Result<()> {
        let prior = E::load(tx, entity.id())?;
        validate_common(&entity)?;
        entity.validate(tx, Some(&prior))?;
        tx.put(E::TYPE.bucket(), entity.id(), entity.encode())?;

        let mut events = EventBuffer::default();
        entity.after_persist(self, tx, Some(&prior), &mut events)?;
        events.flush(tx, &self.events);

        debug!(entity = %E::TYPE, id = %entity.id(), "Updated");
        Ok(())
    }

    /// Deletes an entity, leaving no policy reference, link or pair behind.
    pub fn delete_entity(&self, tx: &mut Tx<'_>, target: EntityType, id: &str) -> Result<()> {
        if !tx.contains(target.bucket(), id) {
            return Err(Error::not_found(target.name(), id));
        }

        match target {
            EntityType::EdgeRouter => router::before_router_delete(self, tx, id)?,
            EntityType::Identity => {
                router::before_identity_delete(tx, id)?;
                sessions::delete_identity_api_sessions(tx, id)?;
            }
            EntityType::Service | EntityType::PostureCheck => {}
        }

        self.remove_references(tx, target, id)?;

        let mut events = EventBuffer::default();
        evaluate_entity(tx, target, id, None, &mut events)?;
        tx.delete(target.bucket(), id)?;
        events.flush(tx, &self.events);

        if target == EntityType::EdgeRouter {
            for kind in [&EDGE_ROUTER_POLICIES, &SERVICE_EDGE_ROUTER_POLICIES] {
                integrity::repair_integrity(tx, kind, &mut |error, _| {
                    warn!(%error, "Repaired after edge router delete");
                })?;
            }
        }

        info!(entity = %target, %id, "Deleted");
        Ok(())
    }

    /// Removes explicit `@id` references to an entity from every policy role list that targets
    /// its type.
    fn remove_references(&self, tx: &mut Tx<'_>, target: EntityType, id: &str) -> Result<()> {
        for kind in PolicyKind::all() {
            let role_fields = kind
                .sides_for(target)
                .map(|(_, s)| s.field)
                .collect::<Vec<_>>();
            if role_fields.is_empty() {
                continue;
            }

            for prior in Policy::load_all(tx, kind)? {
                let mut policy = prior.clone();
                let mut changed = false;
                for field in role_fields.iter() {
                    let roles = policy.role_list(field)?;
                    if roles.references_id(id) {
                        policy
                            .roles
                            .insert(field.to_string(), roles.without_id(id).to_strings());
                        changed = true;
                    }
                }
                if changed {
                    debug!(%kind, policy = %policy.id, entity = %id, "Removing reference");
                    self.persist_policy(tx, &policy, Some(&prior))?;
                }
            }
        }
        Ok(())
    }
}

fn validate_common<E: Entity>(entity: &E) -> Result<()> {
    if entity.id().is_empty() {
        return Err(Error::validation("id", "id is required", [""]));
    }
    if entity.name().trim().is_empty() {
        return Err(Error::validation(
            fields::NAME,
            "name is required",
            [entity.name()],
        ));
    }
    role::validate_attributes(fields::ROLE_ATTRIBUTES, entity.role_attributes())
}

// === impl IdentityType ===

impl IdentityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Router => "Router",
        }
    }

    fn from_stored(s: Option<&str>) -> Self {
        match s {
            Some("Router") => Self::Router,
            _ => Self::Default,
        }
    }
}

// === impl Identity ===

impl Identity {
    pub fn new(id: impl ToString, name: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            identity_type: IdentityType::Default,
            is_admin: false,
            role_attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I: IntoIterator<Item = S>, S: ToString>(mut self, attrs: I) -> Self {
        self.role_attributes = attrs.into_iter().map(|a| a.to_string()).collect();
        self
    }
}

impl Entity for Identity {
    const TYPE: EntityType = EntityType::Identity;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role_attributes(&self) -> &[String] {
        &self.role_attributes
    }

    fn encode(&self) -> Record {
        Record::default()
            .with(fields::NAME, self.name.as_str())
            .with(fields::IDENTITY_TYPE, self.identity_type.as_str())
            .with(fields::IS_ADMIN, self.is_admin)
            .with(fields::ROLE_ATTRIBUTES, self.role_attributes.clone())
    }

    fn decode(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            name: record.str(fields::NAME).unwrap_or_default().to_string(),
            identity_type: IdentityType::from_stored(record.str(fields::IDENTITY_TYPE)),
            is_admin: record.bool(fields::IS_ADMIN),
            role_attributes: record.strings(fields::ROLE_ATTRIBUTES).to_vec(),
        }
    }

    /// Router identities are owned by their edge router.
    fn validate(&self, tx: &Tx<'_>, prior: Option<&Self>) -> Result<()> {
        let prior_type = prior.map(|p| p.identity_type);
        let changes_router_type = prior_type != Some(self.identity_type)
            && (self.identity_type == IdentityType::Router
                || prior_type == Some(IdentityType::Router));
        if changes_router_type && !tx.is_system_context() {
            return Err(Error::validation(
                fields::IDENTITY_TYPE,
                "router identities are managed by their edge router",
                [self.identity_type.as_str()],
            ));
        }
        Ok(())
    }
}

// === impl EdgeRouter ===

impl EdgeRouter {
    pub fn new(id: impl ToString, name: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            is_tunneler_enabled: false,
            role_attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I: IntoIterator<Item = S>, S: ToString>(mut self, attrs: I) -> Self {
        self.role_attributes = attrs.into_iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn tunneler(mut self, enabled: bool) -> Self {
        self.is_tunneler_enabled = enabled;
        self
    }
}

impl Entity for EdgeRouter {
    const TYPE: EntityType = EntityType::EdgeRouter;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role_attributes(&self) -> &[String] {
        &self.role_attributes
    }

    fn encode(&self) -> Record {
        Record::default()
            .with(fields::NAME, self.name.as_str())
            .with(fields::IS_TUNNELER_ENABLED, self.is_tunneler_enabled)
            .with(fields::ROLE_ATTRIBUTES, self.role_attributes.clone())
    }

    fn decode(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            name: record.str(fields::NAME).unwrap_or_default().to_string(),
            is_tunneler_enabled: record.bool(fields::IS_TUNNELER_ENABLED),
            role_attributes: record.strings(fields::ROLE_ATTRIBUTES).to_vec(),
        }
    }

    fn after_persist(
        &self,
        index: &Index,
        tx: &mut Tx<'_>,
        prior: Option<&Self>,
        _events: &mut EventBuffer,
    ) -> Result<()> {
        router::reconcile(index, tx, self, prior)
    }
}

// === impl Service ===

impl Service {
    pub fn new(id: impl ToString, name: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            encryption_required: false,
            role_attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I: IntoIterator<Item = S>, S: ToString>(mut self, attrs: I) -> Self {
        self.role_attributes = attrs.into_iter().map(|a| a.to_string()).collect();
        self
    }
}

impl Entity for Service {
    const TYPE: EntityType = EntityType::Service;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role_attributes(&self) -> &[String] {
        &self.role_attributes
    }

    fn encode(&self) -> Record {
        Record::default()
            .with(fields::NAME, self.name.as_str())
            .with(fields::ENCRYPTION_REQUIRED, self.encryption_required)
            .with(fields::ROLE_ATTRIBUTES, self.role_attributes.clone())
    }

    fn decode(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            name: record.str(fields::NAME).unwrap_or_default().to_string(),
            encryption_required: record.bool(fields::ENCRYPTION_REQUIRED),
            role_attributes: record.strings(fields::ROLE_ATTRIBUTES).to_vec(),
        }
    }

    /// Clients with access to the service must re-read it when its definition changes.
    fn after_persist(
        &self,
        _index: &Index,
        tx: &mut Tx<'_>,
        prior: Option<&Self>,
        events: &mut EventBuffer,
    ) -> Result<()> {
        if let Some(prior) = prior {
            if prior.name != self.name || prior.encryption_required != self.encryption_required {
                events.service_updated(tx, &self.id);
            }
        }
        Ok(())
    }
}

// === impl PostureCheck ===

impl PostureCheck {
    pub fn new(id: impl ToString, name: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            type_id: String::new(),
            role_attributes: Vec::new(),
        }
    }

    pub fn with_attributes<I: IntoIterator<Item = S>, S: ToString>(mut self, attrs: I) -> Self {
        self.role_attributes = attrs.into_iter().map(|a| a.to_string()).collect();
        self
    }
}

impl Entity for PostureCheck {
    const TYPE: EntityType = EntityType::PostureCheck;

    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn role_attributes(&self) -> &[String] {
        &self.role_attributes
    }

    fn encode(&self) -> Record {
        Record::default()
            .with(fields::NAME, self.name.as_str())
            .with(fields::TYPE_ID, self.type_id.as_str())
            .with(fields::ROLE_ATTRIBUTES, self.role_attributes.clone())
    }

    fn decode(id: &str, record: &Record) -> Self {
        Self {
            id: id.to_string(),
            name: record.str(fields::NAME).unwrap_or_default().to_string(),
            type_id: record.str(fields::TYPE_ID).unwrap_or_default().to_string(),
            role_attributes: record.strings(fields::ROLE_ATTRIBUTES).to_vec(),
        }
    }

    /// Services guarded by a posture check are updated when the check's type changes.
    fn after_persist(
        &self,
        _index: &Index,
        tx: &mut Tx<'_>,
        prior: Option<&Self>,
        events: &mut EventBuffer,
    ) -> Result<()> {
        if prior.is_some_and(|p| p.type_id != self.type_id) {
            let mut services = denorm::POSTURE_CHECK_DIAL_SERVICES.related(tx, &self.id, true);
            services.extend(denorm::POSTURE_CHECK_BIND_SERVICES.related(tx, &self.id, true));
            services.sort();
            services.dedup();
            for service_id in services {
                events.service_updated(tx, &service_id);
            }
        }
        Ok(())
    }
}
