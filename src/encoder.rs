//! The Encoder Engine (spec §4.5).
//!
//! Walks a user [`Object`], dispatches custom-type instances to the
//! registry via `TypeId`, and optionally performs two pre-passes governed
//! by [`Policy`]: an intern-table construction (spec §9 cost model) and a
//! namespace-id substitution (spec §4.5). Both pre-passes are pure
//! analysis over the object graph; the actual bytes are only emitted
//! once, by the same recursive walk that would run with both disabled.

use std::any::Any;
use std::collections::HashMap;
use std::io::Write;

use tracing::trace;

use crate::adapter::{Token, Writer};
use crate::engine::EngineHandle;
use crate::error::{Error, Result};
use crate::ext::ExtId;
use crate::object::{Custom, NamespaceRef, Object, Raw};
use crate::policy::{NamespaceIdMode, Policy};
use crate::registry::Registry;

/// Encode one top-level object into a standalone tobytes message.
pub(crate) fn encode(object: &Object, registry: &Registry, policy: &Policy) -> Result<Vec<u8>> {
    let span = tracing::trace_span!("tobytes::encode");
    let _guard = span.enter();

    let namespace_counts = count_namespace_occurrences(object, registry);
    let namespace_ids = assign_namespace_ids(&namespace_counts, policy);
    trace!(substituted_namespaces = namespace_ids.len(), "namespace-id plan built");

    let plan = if policy.interning_enabled() {
        build_intern_plan(object, policy)?
    } else {
        InternPlan::empty()
    };
    trace!(intern_entries = plan.entries.len(), "intern plan built");

    let state = Encoder {
        registry,
        policy,
        namespace_ids: &namespace_ids,
    };

    let mut out = Vec::new();
    {
        let mut writer = Writer::new(&mut out);
        let mut names: Vec<&String> = namespace_ids.keys().collect();
        names.sort();
        state.wrap_namespace_ids(&mut writer, &names, object, &plan)?;
    }
    Ok(out)
}

/// The entries list a single global intern table will carry, in an order
/// where entry *i* only ever depends on entries `< i` (spec §4.5, §8
/// invariant 3). At most one table wraps the whole message, mirroring the
/// decoder's at-most-one-active-frame rule (spec §4.3).
struct InternPlan {
    entries: Vec<Object>,
}

impl InternPlan {
    fn empty() -> Self {
        InternPlan { entries: Vec::new() }
    }
}

/// `collect_candidates`'s recursion depth is bounded by this, purely as a
/// defensive guard against [`Error::CyclicInternGraph`]: `Object` is a
/// plain owned tree (no `Rc`/index-based back-edges), so a true cycle
/// cannot arise from any value buildable today, and no legitimate tree
/// nests this deep. The guard exists so a future aliasing-capable `Object`
/// variant — or a pathological, deliberately adversarial tree — fails with
/// a clean error instead of overflowing the stack.
const MAX_INTERN_DEPTH: usize = 10_000;

fn build_intern_plan(root: &Object, policy: &Policy) -> Result<InternPlan> {
    let mut discovered: Vec<Object> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    collect_candidates(root, policy, &mut discovered, &mut counts, 0)?;

    let mut entries = Vec::new();
    for (representative, count) in discovered.into_iter().zip(counts) {
        if count < 2 {
            continue;
        }
        if worth_interning(&representative, count, entries.len()) {
            entries.push(representative);
        }
    }
    Ok(InternPlan { entries })
}

/// Post-order walk so a representative's own descendants are always
/// discovered — and thus would occupy an earlier entry slot — before the
/// representative itself (spec §9 open question (a): interning operates
/// on whole sub-trees).
fn collect_candidates(
    node: &Object,
    policy: &Policy,
    discovered: &mut Vec<Object>,
    counts: &mut Vec<usize>,
    depth: usize,
) -> Result<()> {
    if depth > MAX_INTERN_DEPTH {
        return Err(Error::CyclicInternGraph);
    }

    match node {
        Object::Array(items) => {
            for item in items {
                collect_candidates(item, policy, discovered, counts, depth + 1)?;
            }
        }
        Object::Map(pairs) => {
            for (key, value) in pairs {
                collect_candidates(key, policy, discovered, counts, depth + 1)?;
                collect_candidates(value, policy, discovered, counts, depth + 1)?;
            }
        }
        _ => {}
    }

    if node.is_composite() {
        match discovered.iter().position(|seen| policy.intern_eq(seen, node)) {
            Some(index) => counts[index] += 1,
            None => {
                discovered.push(node.clone());
                counts.push(1);
            }
        }
    }
    Ok(())
}

/// Spec §9's heuristic: intern when the repeated inline cost outweighs one
/// reference per occurrence plus the incremental cost of one more table
/// slot.
fn worth_interning(representative: &Object, occurrences: usize, entry_index: usize) -> bool {
    const TABLE_SLOT_OVERHEAD: usize = 2;
    let inline_cost = estimate_len(representative);
    let reference_cost = estimate_ref_len(entry_index as u64);
    inline_cost.saturating_mul(occurrences - 1)
        > reference_cost.saturating_mul(occurrences) + TABLE_SLOT_OVERHEAD
}

/// A rough upper bound on a value's own encoded length, for the cost
/// model only — never used to produce actual wire bytes, so it doesn't
/// need to account for registry dispatch precisely.
fn estimate_len(object: &Object) -> usize {
    match object {
        Object::Nil | Object::Bool(_) => 1,
        Object::Int(_) | Object::UInt(_) => 9,
        Object::F32(_) => 5,
        Object::F64(_) => 9,
        Object::Str(s) => 5 + s.len(),
        Object::Bin(b) => 5 + b.len(),
        Object::Array(items) => 5 + items.iter().map(estimate_len).sum::<usize>(),
        Object::Map(pairs) => {
            5 + pairs
                .iter()
                .map(|(k, v)| estimate_len(k) + estimate_len(v))
                .sum::<usize>()
        }
        Object::Custom(_) => 32,
        Object::Raw(raw) => 10 + raw.bytes.len(),
    }
}

fn estimate_ref_len(index: u64) -> usize {
    let uint_len = if index < 0x80 {
        1
    } else if index < 0x1_0000 {
        3
    } else {
        9
    };
    2 + uint_len
}

fn count_namespace_occurrences(object: &Object, registry: &Registry) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    walk_count_namespaces(object, registry, &mut counts);
    counts
}

fn walk_count_namespaces(object: &Object, registry: &Registry, counts: &mut HashMap<String, usize>) {
    match object {
        Object::Array(items) => {
            for item in items {
                walk_count_namespaces(item, registry, counts);
            }
        }
        Object::Map(pairs) => {
            for (key, value) in pairs {
                walk_count_namespaces(key, registry, counts);
                walk_count_namespaces(value, registry, counts);
            }
        }
        Object::Custom(custom) => {
            if let Some(entry) = registry.lookup_encode(custom.value.as_any().type_id()) {
                *counts.entry(entry.namespace.clone()).or_insert(0) += 1;
            }
        }
        _ => {}
    }
}

fn assign_namespace_ids(counts: &HashMap<String, usize>, policy: &Policy) -> HashMap<String, u64> {
    let mode = policy.namespace_id_mode();
    if matches!(mode, NamespaceIdMode::Disabled) {
        return HashMap::new();
    }
    let mut qualifying: Vec<&String> = counts
        .iter()
        .filter(|&(namespace, count)| mode.threshold_for(namespace).is_some_and(|t| *count >= t))
        .map(|(namespace, _)| namespace)
        .collect();
    qualifying.sort();
    qualifying
        .into_iter()
        .enumerate()
        .map(|(id, namespace)| (namespace.clone(), id as u64))
        .collect()
}

struct Encoder<'r> {
    registry: &'r Registry,
    policy: &'r Policy,
    namespace_ids: &'r HashMap<String, u64>,
}

impl<'r> Encoder<'r> {
    /// Nest one `0x07` envelope per qualifying namespace (spec §4.5),
    /// innermost envelope wrapping the intern table (if any) wrapping the
    /// real body.
    fn wrap_namespace_ids<W: Write>(
        &self,
        writer: &mut Writer<W>,
        remaining: &[&String],
        object: &Object,
        plan: &InternPlan,
    ) -> Result<()> {
        match remaining.split_first() {
            None => self.encode_body(writer, object, plan),
            Some((namespace, rest)) => {
                let id = self.namespace_ids[*namespace];
                trace!(namespace = %namespace, id, "opening namespace-id envelope");
                let mut inner = Vec::new();
                {
                    let mut inner_writer = Writer::new(&mut inner);
                    self.wrap_namespace_ids(&mut inner_writer, rest, object, plan)?;
                }
                let mut payload = Vec::new();
                {
                    let mut pw = Writer::new(&mut payload);
                    pw.write(&Token::ArrayLen(3))?;
                    pw.write(&Token::Str((*namespace).clone()))?;
                    pw.write(&Token::UInt(id))?;
                }
                payload.extend(inner);
                writer.write(&Token::Ext {
                    id: ExtId::NamespaceId.wire(),
                    payload,
                })
            }
        }
    }

    fn encode_body<W: Write>(&self, writer: &mut Writer<W>, object: &Object, plan: &InternPlan) -> Result<()> {
        if plan.entries.is_empty() {
            return self.encode_object(writer, object, plan, 0);
        }
        let mut payload = Vec::new();
        {
            let mut pw = Writer::new(&mut payload);
            pw.write(&Token::ArrayLen(2))?;
            pw.write(&Token::ArrayLen(plan.entries.len() as u32))?;
            for (index, entry) in plan.entries.iter().enumerate() {
                self.encode_object(&mut pw, entry, plan, index)?;
            }
            self.encode_object(&mut pw, object, plan, plan.entries.len())?;
        }
        writer.write(&Token::Ext {
            id: ExtId::InternTableOrRef.wire(),
            payload,
        })
    }

    /// `visible_upto` bounds which entries may be referenced: while
    /// encoding entry *i* itself it is `i`, excluding both itself and
    /// later entries and so ruling out self-reference for free; while
    /// encoding the body it is `plan.entries.len()`, the full table.
    fn encode_object<W: Write>(
        &self,
        writer: &mut Writer<W>,
        object: &Object,
        plan: &InternPlan,
        visible_upto: usize,
    ) -> Result<()> {
        if visible_upto > 0 {
            if let Some(index) = plan.entries[..visible_upto]
                .iter()
                .position(|entry| self.policy.intern_eq(entry, object))
            {
                let mut payload = Vec::new();
                Writer::new(&mut payload).write(&Token::UInt(index as u64))?;
                return writer.write(&Token::Ext {
                    id: ExtId::InternTableOrRef.wire(),
                    payload,
                });
            }
        }

        match object {
            Object::Nil => writer.write(&Token::Nil),
            Object::Bool(b) => writer.write(&Token::Bool(*b)),
            Object::Int(v) => writer.write(&Token::Int(*v)),
            Object::UInt(v) => writer.write(&Token::UInt(*v)),
            Object::F32(v) => writer.write(&Token::F32(*v)),
            Object::F64(v) => writer.write(&Token::F64(*v)),
            Object::Str(s) => writer.write(&Token::Str(s.clone())),
            Object::Bin(b) => writer.write(&Token::Bin(b.clone())),
            Object::Array(items) => {
                writer.write(&Token::ArrayLen(items.len() as u32))?;
                for item in items {
                    self.encode_object(writer, item, plan, visible_upto)?;
                }
                Ok(())
            }
            Object::Map(pairs) => {
                writer.write(&Token::MapLen(pairs.len() as u32))?;
                for (key, value) in pairs {
                    self.encode_object(writer, key, plan, visible_upto)?;
                    self.encode_object(writer, value, plan, visible_upto)?;
                }
                Ok(())
            }
            Object::Custom(custom) => self.encode_custom(writer, custom),
            Object::Raw(raw) => self.encode_raw(writer, raw),
        }
    }

    fn encode_custom<W: Write>(&self, writer: &mut Writer<W>, custom: &Custom) -> Result<()> {
        let entry = self
            .registry
            .lookup_encode(custom.value.as_any().type_id())
            .ok_or(Error::UnregisteredType)?;

        let handle = EngineHandle::new(self.registry, self.policy);
        let bytes = (entry.encode)(custom.value.as_any(), &handle).map_err(|source| Error::CodecFault {
            namespace: entry.namespace.clone(),
            type_id: entry.type_id,
            source,
        })?;

        let namespace_ref = match self.namespace_ids.get(&entry.namespace) {
            Some(id) => NamespaceRef::Id(*id),
            None => NamespaceRef::Name(entry.namespace.clone()),
        };

        let mut payload = Vec::new();
        {
            let mut pw = Writer::new(&mut payload);
            pw.write(&Token::ArrayLen(3))?;
            match namespace_ref {
                NamespaceRef::Name(name) => pw.write(&Token::Str(name))?,
                NamespaceRef::Id(id) => pw.write(&Token::UInt(id))?,
            }
            pw.write(&Token::UInt(entry.type_id))?;
            pw.write(&Token::Bin(bytes))?;
        }
        writer.write(&Token::Ext {
            id: ExtId::CustomType.wire(),
            payload,
        })
    }

    /// Re-emits an unresolved opaque value exactly as captured, ignoring
    /// any namespace-id substitution plan: `Raw` exists precisely so its
    /// original bytes reproduce verbatim (spec §7, scenario S6).
    fn encode_raw<W: Write>(&self, writer: &mut Writer<W>, raw: &Raw) -> Result<()> {
        let mut payload = Vec::new();
        {
            let mut pw = Writer::new(&mut payload);
            pw.write(&Token::ArrayLen(3))?;
            match &raw.namespace {
                NamespaceRef::Name(name) => pw.write(&Token::Str(name.clone()))?,
                NamespaceRef::Id(id) => pw.write(&Token::UInt(*id))?,
            }
            pw.write(&Token::UInt(raw.type_id))?;
            pw.write(&Token::Bin(raw.bytes.clone()))?;
        }
        writer.write(&Token::Ext {
            id: ExtId::CustomType.wire(),
            payload,
        })
    }
}
