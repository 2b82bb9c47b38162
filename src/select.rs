//! SELECT composition over a loaded registry.
//!
//! Produces
//!
//! ```sql
//! SELECT <expr> AS "<id>", ... FROM <table> <alias>
//!     [<join clause>...] [WHERE <subject filter>] [GROUP BY <grouping items>]
//! ```
//!
//! Only relations that serve a requested item are joined, plus any sibling
//! relation their ON clause reads from. Each is joined once, after the
//! relations it reads; otherwise in relation order. Relations that read
//! each other in a cycle are a configuration error.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::binding::{Aggregation, BindingSet, ItemRef, Relation};
use crate::error::BinderyError;
use crate::principal::{Principal, StaticPrincipal};
use crate::registry::BindingRegistry;
use crate::sql::{quote_ident, MAIN_ALIAS};

pub struct SelectBuilder<'r> {
    registry: &'r BindingRegistry,
    set: Arc<BindingSet>,
    items: Vec<String>,
    alias: Option<String>,
    principal: Option<Arc<dyn Principal>>,
}

impl<'r> SelectBuilder<'r> {
    pub fn new(registry: &'r BindingRegistry, binding_set: &str) -> Result<Self, BinderyError> {
        Ok(SelectBuilder {
            registry,
            set: registry.get(binding_set)?,
            items: Vec::new(),
            alias: None,
            principal: None,
        })
    }

    pub fn item(mut self, id: &str) -> Self {
        self.items.push(id.to_string());
        self
    }

    pub fn items(mut self, ids: &[&str]) -> Self {
        self.items.extend(ids.iter().map(|id| id.to_string()));
        self
    }

    /// Override the binding set's default table alias.
    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    /// Restrict rows by the binding set's subject filters for `principal`.
    ///
    /// A binding set with subject filters and no principal is queried as
    /// an anonymous principal, which sees no rows.
    pub fn principal(mut self, principal: Arc<dyn Principal>) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn build(&self) -> Result<String, BinderyError> {
        let set = self.set.as_ref();
        let alias = self.alias.as_deref().unwrap_or(set.alias());

        let ids: Vec<String> = if self.items.is_empty() {
            set.items().iter().map(|i| i.id.clone()).collect()
        } else {
            self.items.clone()
        };
        let resolved = ids
            .iter()
            .map(|id| set.lookup(self.registry, id))
            .collect::<Result<Vec<ItemRef<'_>>, _>>()?;

        let mut columns = Vec::with_capacity(resolved.len());
        let mut group_by = Vec::new();
        let mut relations = BTreeSet::new();
        for item in &resolved {
            let expr = item.qualified_expression(alias);
            match item {
                ItemRef::Native(native) => {
                    if native.aggregation == Aggregation::None {
                        group_by.push(expr.clone());
                    }
                }
                ItemRef::Imported { relation, .. } => {
                    relations.insert(relation.index());
                }
            }
            columns.push(format!("{expr} AS {}", quote_ident(item.id())));
        }

        let relations = self.join_order(relations)?;
        let mut sql = format!(
            "SELECT {} FROM {} {alias}",
            columns.join(", "),
            set.table_reference()
        );
        for index in relations {
            sql.push(' ');
            sql.push_str(&set.relations()[index].join_clause(self.registry, alias)?);
        }
        if let Some(filter) = self.where_clause(alias)? {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        if !group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&group_by.join(", "));
        }
        Ok(sql)
    }

    /// Close `needed` over the sibling relations their ON clauses read from,
    /// ordered so that each relation follows every relation it reads.
    ///
    /// Kahn's algorithm; among ready relations the lowest index goes first.
    fn join_order(&self, needed: BTreeSet<usize>) -> Result<Vec<usize>, BinderyError> {
        let relations = self.set.relations();
        let mut upstream: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut pending: Vec<usize> = needed.into_iter().collect();
        while let Some(index) = pending.pop() {
            if upstream.contains_key(&index) {
                continue;
            }
            let template = relations[index].condition_template(self.registry)?;
            let reads: Vec<usize> = relations
                .iter()
                .filter(|other| {
                    other.index() != index
                        && template.contains(&format!("{}.", other.alias(MAIN_ALIAS)))
                })
                .map(Relation::index)
                .collect();
            pending.extend(reads.iter().copied());
            upstream.insert(index, reads);
        }

        let mut in_degree: BTreeMap<usize, usize> = upstream
            .iter()
            .map(|(index, reads)| (*index, reads.len()))
            .collect();
        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(index, _)| *index)
            .collect();
        let mut order = Vec::with_capacity(upstream.len());
        while let Some(index) = ready.pop_first() {
            order.push(index);
            for (dependent, reads) in &upstream {
                if !reads.contains(&index) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() < upstream.len() {
            let cycle = upstream
                .keys()
                .filter(|index| !order.contains(*index))
                .map(|index| relations[*index].label())
                .collect();
            return Err(BinderyError::JoinCycle {
                binding_set: self.set.name().to_string(),
                relations: cycle,
            });
        }
        Ok(order)
    }

    fn where_clause(&self, alias: &str) -> Result<Option<String>, BinderyError> {
        let Some(filters) = self.set.subject_filters() else {
            return Ok(None);
        };
        match &self.principal {
            Some(principal) => filters.where_clause(&self.set, principal.as_ref(), alias),
            None => filters.where_clause(&self.set, &StaticPrincipal::anonymous(), alias),
        }
    }
}
