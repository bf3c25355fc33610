//! Capability handlers: pluggable per-category policies that decide whether a
//! target yields a unit of work.

use std::fmt;

use contracts::{HandlerKind, TargetLocation, WorkUnit, WorkerId};

/// Which kind of location a handler declares interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestFilter {
    Cells,
    Objects,
}

impl InterestFilter {
    pub fn admits(self, location: TargetLocation) -> bool {
        match (self, location) {
            (InterestFilter::Cells, TargetLocation::Cell(_)) => true,
            (InterestFilter::Objects, TargetLocation::Object(_)) => true,
            _ => false,
        }
    }
}

pub trait WorkHandler<W> {
    fn kind(&self) -> HandlerKind;

    fn filter(&self) -> InterestFilter;

    /// The handler's own interest test (designations, flags).
    fn matches(&self, world: &W, location: TargetLocation) -> bool;

    /// Manual equivalent of `matches` used when forcing coerces an ignorable
    /// category, e.g. "treat this item as haulable although it is not marked".
    fn coerced_match(&self, _world: &W, _location: TargetLocation) -> bool {
        false
    }

    fn worker_capable(&self, _world: &W, _worker: WorkerId) -> bool {
        true
    }

    /// Work exists at the location, claims aside.
    fn has_work(&self, world: &W, worker: WorkerId, location: TargetLocation, forced: bool) -> bool;

    fn produce(
        &self,
        world: &W,
        worker: WorkerId,
        location: TargetLocation,
        forced: bool,
    ) -> Option<WorkUnit> {
        self.has_work(world, worker, location, forced)
            .then(|| WorkUnit::new(worker, self.kind(), location))
    }
}

/// The handlers available in one world, in configured dispatch order.
pub struct HandlerCatalog<W> {
    handlers: Vec<Box<dyn WorkHandler<W>>>,
}

impl<W> HandlerCatalog<W> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn with(mut self, handler: impl WorkHandler<W> + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Adds a handler, replacing any registered handler of the same kind in place.
    pub fn register(&mut self, handler: impl WorkHandler<W> + 'static) {
        let kind = handler.kind();
        let boxed: Box<dyn WorkHandler<W>> = Box::new(handler);
        match self.handlers.iter().position(|existing| existing.kind() == kind) {
            Some(idx) => self.handlers[idx] = boxed,
            None => self.handlers.push(boxed),
        }
    }

    pub fn get(&self, kind: HandlerKind) -> Option<&dyn WorkHandler<W>> {
        self.handlers
            .iter()
            .find(|handler| handler.kind() == kind)
            .map(|handler| handler.as_ref())
    }

    pub fn contains(&self, kind: HandlerKind) -> bool {
        self.get(kind).is_some()
    }

    pub fn kinds(&self) -> Vec<HandlerKind> {
        self.handlers.iter().map(|handler| handler.kind()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn WorkHandler<W>> {
        self.handlers.iter().map(|handler| handler.as_ref())
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<W> Default for HandlerCatalog<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> fmt::Debug for HandlerCatalog<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.kinds()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::Cell;

    struct Fixed {
        kind: HandlerKind,
        answer: bool,
    }

    impl WorkHandler<()> for Fixed {
        fn kind(&self) -> HandlerKind {
            self.kind
        }

        fn filter(&self) -> InterestFilter {
            InterestFilter::Cells
        }

        fn matches(&self, _world: &(), _location: TargetLocation) -> bool {
            true
        }

        fn has_work(&self, _: &(), _: WorkerId, _: TargetLocation, _: bool) -> bool {
            self.answer
        }
    }

    #[test]
    fn register_replaces_same_kind_in_place() {
        let mut catalog = HandlerCatalog::new()
            .with(Fixed {
                kind: HandlerKind::Clean,
                answer: false,
            })
            .with(Fixed {
                kind: HandlerKind::Mine,
                answer: true,
            });
        catalog.register(Fixed {
            kind: HandlerKind::Clean,
            answer: true,
        });
        assert_eq!(catalog.kinds(), vec![HandlerKind::Clean, HandlerKind::Mine]);

        let location = TargetLocation::Cell(Cell::new(0, 0));
        let unit = catalog
            .get(HandlerKind::Clean)
            .and_then(|handler| handler.produce(&(), WorkerId(1), location, true))
            .expect("replacement handler produces work");
        assert_eq!(unit.handler, HandlerKind::Clean);
    }

    #[test]
    fn filter_admits_only_its_location_kind() {
        let cell = TargetLocation::Cell(Cell::new(1, 1));
        let object = TargetLocation::Object(contracts::ObjectId(9));
        assert!(InterestFilter::Cells.admits(cell));
        assert!(!InterestFilter::Cells.admits(object));
        assert!(InterestFilter::Objects.admits(object));
    }
}
