//! The pure fold from events to entity snapshots.
//!
//! [`reduce`] must be deterministic: two stores replaying the same events in
//! the same order must produce identical snapshots.

use crate::{
  Error, Result,
  entity::{AttachmentReference, Entity},
  event::{Event, EventPayload},
  scheduler,
  task::{Task, TaskComponentState},
};

/// Signature of an event reducer. [`reduce`] is the real one; tests inject
/// others through [`crate::database::Database::with_reducer`].
pub type EventReducer = fn(Option<Entity>, &Event) -> Result<Entity>;

/// Apply one event to the prior snapshot of its entity (`None` if the entity
/// has no history yet).
pub fn reduce(prior: Option<Entity>, event: &Event) -> Result<Entity> {
  match &event.payload {
    EventPayload::AttachmentIngest { mime_type } => match prior {
      None => Ok(Entity::AttachmentReference(AttachmentReference {
        id:                          event.entity_id.clone(),
        created_at_timestamp_millis: event.timestamp_millis,
        mime_type:                   *mime_type,
      })),
      Some(existing @ Entity::AttachmentReference(_)) => Ok(existing),
      Some(other @ Entity::Task(_)) => Err(mismatch(event, &other)),
    },
    EventPayload::TaskIngest { spec, provenance, metadata } => match prior {
      None => {
        let component_states = spec
          .content
          .component_ids()
          .into_iter()
          .map(|id| (id, TaskComponentState::new(event.timestamp_millis)))
          .collect();
        Ok(Entity::Task(Task {
          id: event.entity_id.clone(),
          created_at_timestamp_millis: event.timestamp_millis,
          spec: spec.clone(),
          provenance: provenance.clone(),
          component_states,
          is_deleted: false,
          metadata: metadata.clone(),
        }))
      }
      Some(Entity::Task(mut task)) => {
        // Re-ingesting revives a deleted task but never replaces its spec or
        // component states.
        task.is_deleted = false;
        if let Some(provenance) = provenance {
          task.provenance = Some(provenance.clone());
        }
        task.metadata.extend(metadata.clone());
        Ok(Entity::Task(task))
      }
      Some(other) => Err(mismatch(event, &other)),
    },
    EventPayload::TaskRepetition { component_id, outcome, .. } => {
      update_task(prior, event, |task| {
        let Some(state) = task.component_states.get_mut(component_id) else {
          tracing::warn!(
            event_id = %event.id,
            task_id = %event.entity_id,
            %component_id,
            "ignoring repetition of unknown component"
          );
          return Ok(());
        };
        let next =
          scheduler::next_state(state, event.timestamp_millis, *outcome);
        state.last_repetition_timestamp_millis = Some(event.timestamp_millis);
        state.interval_millis = next.interval_millis;
        state.due_timestamp_millis = next.due_timestamp_millis;
        Ok(())
      })
    }
    EventPayload::TaskReschedule { component_id, new_due_timestamp_millis } => {
      update_task(prior, event, |task| {
        let state = task.component_states.get_mut(component_id).ok_or_else(
          || Error::UnknownComponent {
            event_id:     event.id.clone(),
            entity_id:    event.entity_id.clone(),
            component_id: component_id.clone(),
          },
        )?;
        state.due_timestamp_millis = *new_due_timestamp_millis;
        Ok(())
      })
    }
    EventPayload::TaskUpdateDeleted { is_deleted } => {
      update_task(prior, event, |task| {
        task.is_deleted = *is_deleted;
        Ok(())
      })
    }
    EventPayload::TaskUpdateSpec { spec } => update_task(prior, event, |task| {
      task.spec = spec.clone();
      Ok(())
    }),
    EventPayload::TaskUpdateProvenance { provenance } => {
      update_task(prior, event, |task| {
        task.provenance = provenance.clone();
        Ok(())
      })
    }
    EventPayload::TaskUpdateMetadata { metadata } => {
      update_task(prior, event, |task| {
        task.metadata.extend(metadata.clone());
        Ok(())
      })
    }
  }
}

/// Apply `f` to the prior task snapshot, which must exist.
fn update_task(
  prior: Option<Entity>,
  event: &Event,
  f: impl FnOnce(&mut Task) -> Result<()>,
) -> Result<Entity> {
  let mut task = match prior {
    Some(Entity::Task(task)) => task,
    Some(other) => return Err(mismatch(event, &other)),
    None => {
      return Err(Error::MissingSnapshot {
        event_type: event.event_type(),
        entity_id:  event.entity_id.clone(),
      });
    }
  };
  f(&mut task)?;
  Ok(Entity::Task(task))
}

fn mismatch(event: &Event, found: &Entity) -> Error {
  Error::EntityTypeMismatch {
    event_id:   event.id.clone(),
    event_type: event.event_type(),
    found:      found.entity_type(),
  }
}
