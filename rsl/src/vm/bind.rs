//! Binding a shader's symbol table to grid storage and call parameters
use crate::{
    Error,
    asm::Shader,
    grid::{Grid, GridLayout},
    types::{Data, StorageClass, Symbol},
};
use log::trace;

/// Backing storage of a bound symbol
#[derive(Debug)]
enum Storage<'a> {
    /// Borrowed read-only from the shader or the instance
    Shared(&'a Data),
    /// Borrowed from the grid, written in place
    Grid(&'a mut Data),
    /// Allocated for this invocation and dropped on unbind
    Owned(Data),
}

/// One bound symbol
#[derive(Debug)]
pub(crate) struct Slot<'a> {
    storage: Storage<'a>,
    writable: bool,
    /// The symbol this slot was bound from
    pub symbol: &'a Symbol,
}

impl Slot<'_> {
    pub fn data(&self) -> &Data {
        match &self.storage {
            Storage::Shared(d) => d,
            Storage::Grid(d) => d,
            Storage::Owned(d) => d,
        }
    }

    /// Checks whether this invocation owns the slot's storage
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(..))
    }
}

impl Storage<'_> {
    fn data_mut(&mut self) -> Option<&mut Data> {
        match self {
            Storage::Shared(..) => None,
            Storage::Grid(d) => Some(d),
            Storage::Owned(d) => Some(d),
        }
    }
}

/// Per-invocation data segment: one slot per shader symbol, in order
#[derive(Debug)]
pub struct DataSegment<'a> {
    slots: Vec<Slot<'a>>,
    /// Grid globals that the shader does not declare, for shading built-ins
    extras: Vec<(&'a str, &'a Data)>,
}

/// Removes and returns the grid global with the given name
fn take<'a>(pool: &mut [Option<&'a mut Symbol>], name: &str) -> Option<&'a mut Symbol> {
    let i = pool
        .iter()
        .position(|s| s.as_ref().is_some_and(|s| s.name == name))?;
    pool[i].take()
}

/// Checks that grid storage matches its symbol's type and variability
fn check_storage(sym: &Symbol, layout: GridLayout) -> Result<(), Error> {
    let expected = if sym.is_varying() { layout.slot_count() } else { 1 };
    match &sym.value {
        Some(d) if d.holds(sym.ty) && d.len() == expected => Ok(()),
        _ => Err(Error::BadStorage(sym.name.clone())),
    }
}

/// Binds a grid global, returning its storage
fn bind_global<'a>(decl: &Symbol, g: &'a mut Symbol, layout: GridLayout) -> Result<Storage<'a>, Error> {
    decl.check_match(g)?;
    check_storage(g, layout)?;
    g.value
        .as_mut()
        .map(Storage::Grid)
        .ok_or_else(|| Error::BadStorage(decl.name.clone()))
}

impl<'a> DataSegment<'a> {
    /// Binds every shader symbol, in declaration order
    ///
    /// - constants bind read-only to their own literal
    /// - globals bind to the grid global of the same name, which must exist
    ///   and match exactly
    /// - parameters prefer a grid global, then a call-time parameter (which
    ///   must be uniform), then their declared default
    /// - temporaries get fresh storage owned by this invocation
    pub fn bind(shader: &'a Shader, params: &'a [Symbol], grid: &'a mut Grid) -> Result<Self, Error> {
        let layout = grid.layout();
        let mut pool: Vec<Option<&'a mut Symbol>> =
            grid.symbols_mut().iter_mut().map(Some).collect();
        let mut slots = Vec::with_capacity(shader.symbols().len());
        for sym in shader.symbols() {
            let (storage, writable) = match sym.storage {
                StorageClass::Constant => {
                    let v = sym
                        .value
                        .as_ref()
                        .ok_or_else(|| Error::BadStorage(sym.name.clone()))?;
                    (Storage::Shared(v), false)
                }
                StorageClass::Global => {
                    let g = take(&mut pool, &sym.name)
                        .ok_or_else(|| Error::MissingGlobal(sym.name.clone()))?;
                    (bind_global(sym, g, layout)?, true)
                }
                StorageClass::Parameter => {
                    if let Some(g) = take(&mut pool, &sym.name) {
                        (bind_global(sym, g, layout)?, true)
                    } else if let Some(p) = params.iter().find(|p| p.name == sym.name) {
                        if p.is_varying() {
                            return Err(Error::VaryingOverride(sym.name.clone()));
                        }
                        sym.check_match(p)?;
                        match &p.value {
                            Some(v) if v.holds(p.ty) && v.len() == 1 => (Storage::Shared(v), false),
                            _ => return Err(Error::BadStorage(sym.name.clone())),
                        }
                    } else if sym.is_varying() {
                        return Err(Error::MissingParameter(sym.name.clone()));
                    } else if let Some(v) = &sym.value {
                        (Storage::Shared(v), false)
                    } else {
                        (Storage::Owned(Data::new(sym.ty, 1)), false)
                    }
                }
                StorageClass::Temporary => {
                    let len = if sym.is_varying() { layout.slot_count() } else { 1 };
                    (Storage::Owned(Data::new(sym.ty, len)), true)
                }
            };
            slots.push(Slot {
                storage,
                writable,
                symbol: sym,
            });
        }

        let extras: Vec<(&'a str, &'a Data)> = pool
            .into_iter()
            .flatten()
            .filter_map(|s| {
                let s: &'a Symbol = s;
                s.value.as_ref().map(|v| (s.name.as_str(), v))
            })
            .collect();
        trace!(
            "bound `{}`: {} slots, {} extra globals",
            shader.name(),
            slots.len(),
            extras.len()
        );
        Ok(Self { slots, extras })
    }

    pub(crate) fn slot(&self, i: usize) -> Option<&Slot<'a>> {
        self.slots.get(i)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the data bound to slot `i`
    pub fn data(&self, i: usize) -> Option<&Data> {
        self.slots.get(i).map(Slot::data)
    }

    /// Finds data by name, in bound slots first and then in extra globals
    pub fn lookup(&self, name: &str) -> Option<&Data> {
        self.slots
            .iter()
            .find(|s| s.symbol.name == name)
            .map(Slot::data)
            .or_else(|| self.extras.iter().find(|(n, _)| *n == name).map(|(_, d)| *d))
    }

    /// Runs `f` with the destination slot borrowed mutably and the source
    /// slots borrowed immutably
    ///
    /// Sources that alias the destination see its value from before `f`.
    pub(crate) fn with_dst<const N: usize, R>(
        &mut self,
        dst: usize,
        srcs: [usize; N],
        f: impl FnOnce(&mut Data, [&Data; N]) -> R,
    ) -> Result<R, String> {
        let slot = self
            .slots
            .get(dst)
            .ok_or_else(|| format!("no symbol at index {dst}"))?;
        if !slot.writable {
            return Err(format!("`{}` is read-only", slot.symbol.name));
        }
        if let Some(s) = srcs.iter().find(|s| **s >= self.slots.len()) {
            return Err(format!("no symbol at index {s}"));
        }
        let aliased: [Option<Data>; N] =
            srcs.map(|s| (s == dst).then(|| self.slots[s].data().clone()));

        let placeholder = Storage::Owned(Data::Float(vec![]));
        let mut taken = std::mem::replace(&mut self.slots[dst].storage, placeholder);
        let out = match taken.data_mut() {
            Some(d) => {
                let slots = &self.slots;
                let refs: [&Data; N] = std::array::from_fn(|i| match &aliased[i] {
                    Some(a) => a,
                    None => slots[srcs[i]].data(),
                });
                Ok(f(d, refs))
            }
            None => Err("destination is read-only".to_owned()),
        };
        self.slots[dst].storage = taken;
        out
    }

    /// Releases owned storage, returning the number of slots freed
    pub fn unbind(self) -> usize {
        let owned = self.slots.iter().filter(|s| s.is_owned()).count();
        drop(self);
        owned
    }
}
