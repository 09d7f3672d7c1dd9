//! Iterative network stacking: daily polyhedrons are aligned onto targets
//! derived from per station trajectory models, until every one is aligned.
use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
};

use log::{debug, error, info, warn};

use crate::{
    adjustment::percentile,
    cfg::Config,
    constraints::{align_to_frame, estimate_frame_alignment, FrameAlignment, FrameConstraints},
    etm::{Etm, Jump, TimeSeries},
    polyhedron::{AlignmentInfo, Polyhedron, Vertex},
    pool::WorkerPool,
    prelude::{Epoch, Error, StationId},
    provider::DailySolutionProvider,
    time::year_doy,
};

/// Alignment summaries of one outer iteration
#[derive(Debug, Clone, PartialEq)]
pub struct IterationSnapshot {
    pub iteration: usize,
    pub alignments: Vec<AlignmentInfo>,
    /// Days that could not be aligned during this iteration
    pub skipped: Vec<Epoch>,
}

/// One persisted (station, date) position
#[derive(Debug, Clone, PartialEq)]
pub struct StackRow {
    pub project: String,
    pub name: String,
    pub station: StationId,
    pub date: Epoch,
    pub year: i32,
    pub doy: u16,
    pub xyz: [f64; 3],
    pub variance_factor: f64,
}

/// [Stack]: date ordered [Polyhedron]s of one project
#[derive(Debug, Clone)]
pub struct Stack {
    pub project: String,
    pub name: String,
    /// Sorted by date
    pub polyhedra: Vec<Polyhedron>,
    /// Union of all stations
    pub stations: Vec<StationId>,
    /// Audit trail, one entry per completed outer iteration
    pub transformations: Vec<IterationSnapshot>,
    /// Trajectories fitted on the final stack
    pub etms: Vec<Etm>,
    pub frame_alignment: Option<FrameAlignment>,
}

impl Stack {
    /// Builds a new [Stack]. Polyhedrons of other projects are dropped.
    pub fn new(project: &str, name: &str, polyhedra: Vec<Polyhedron>) -> Self {
        let mut s = Self {
            project: project.to_string(),
            name: name.to_string(),
            polyhedra: Vec::new(),
            stations: Vec::new(),
            transformations: Vec::new(),
            etms: Vec::new(),
            frame_alignment: None,
        };
        for polyhedron in polyhedra {
            s.add(polyhedron);
        }
        s
    }

    /// Inserts a [Polyhedron], unless its day is already stacked
    pub fn add(&mut self, polyhedron: Polyhedron) -> bool {
        if polyhedron.project != self.project {
            warn!(
                "{}: rejecting polyhedron of project {}",
                self.project, polyhedron.project
            );
            return false;
        }
        match self
            .polyhedra
            .binary_search_by(|p| p.date.cmp(&polyhedron.date))
        {
            Ok(_) => false,
            Err(index) => {
                for station in polyhedron.stations() {
                    if let Err(pos) = self.stations.binary_search(station) {
                        self.stations.insert(pos, station.clone());
                    }
                }
                self.polyhedra.insert(index, polyhedron);
                true
            },
        }
    }

    pub fn polyhedron(&self, date: Epoch) -> Option<&Polyhedron> {
        self.polyhedra
            .binary_search_by(|p| p.date.cmp(&date))
            .ok()
            .map(|index| &self.polyhedra[index])
    }

    pub fn dates(&self) -> Vec<Epoch> {
        self.polyhedra.iter().map(|p| p.date).collect()
    }

    /// True once every [Polyhedron] is aligned
    pub fn is_aligned(&self) -> bool {
        self.polyhedra.iter().all(|p| p.is_aligned())
    }

    /// Stacked positions of this station
    pub fn series(&self, station: &StationId) -> TimeSeries {
        let mut series = TimeSeries::new(station.clone());
        for polyhedron in self.polyhedra.iter() {
            if let Some(vertex) = polyhedron.vertex(station) {
                series.push(polyhedron.date, vertex.xyz);
            }
        }
        series
    }

    /// Final trajectory of this station, if one could be fitted
    pub fn etm(&self, station: &StationId) -> Option<&Etm> {
        self.etms.iter().find(|etm| &etm.station == station)
    }

    /// Persisted layout: one row per (station, date)
    pub fn rows(&self) -> Vec<StackRow> {
        self.polyhedra
            .iter()
            .flat_map(|polyhedron| {
                let (year, doy) = year_doy(polyhedron.date);
                polyhedron.vertices.iter().map(move |vertex| StackRow {
                    project: self.project.clone(),
                    name: self.name.clone(),
                    station: vertex.station.clone(),
                    date: polyhedron.date,
                    year,
                    doy,
                    xyz: [vertex.xyz[0], vertex.xyz[1], vertex.xyz[2]],
                    variance_factor: polyhedron.variance_factor,
                })
            })
            .collect()
    }
}

/// Persistence of [Stack]s, with exclusive write access per (project, name)
pub trait StackStore: Send + Sync {
    /// Non blocking: false if the stack is already held
    fn acquire(&self, project: &str, name: &str) -> bool;

    fn release(&self, project: &str, name: &str);

    /// Previously persisted [Stack], if any
    fn load(&self, project: &str, name: &str) -> Result<Option<Stack>, Error>;

    fn save(&self, stack: &Stack) -> Result<(), Error>;
}

/// Exclusive access to one stack, released on drop
pub struct StackLease<'a> {
    store: &'a dyn StackStore,
    project: String,
    name: String,
}

impl<'a> StackLease<'a> {
    pub fn acquire(store: &'a dyn StackStore, project: &str, name: &str) -> Result<Self, Error> {
        if !store.acquire(project, name) {
            return Err(Error::StackLocked {
                project: project.to_string(),
                name: name.to_string(),
            });
        }
        Ok(Self {
            store,
            project: project.to_string(),
            name: name.to_string(),
        })
    }
}

impl Drop for StackLease<'_> {
    fn drop(&mut self) {
        self.store.release(&self.project, &self.name);
    }
}

/// In memory [StackStore]
#[derive(Debug, Default)]
pub struct MemoryStackStore {
    leases: Mutex<HashSet<(String, String)>>,
    stacks: Mutex<HashMap<(String, String), Stack>>,
}

impl MemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StackStore for MemoryStackStore {
    fn acquire(&self, project: &str, name: &str) -> bool {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.insert((project.to_string(), name.to_string()))
    }

    fn release(&self, project: &str, name: &str) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(&(project.to_string(), name.to_string()));
    }

    fn load(&self, project: &str, name: &str) -> Result<Option<Stack>, Error> {
        let stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        Ok(stacks
            .get(&(project.to_string(), name.to_string()))
            .cloned())
    }

    fn save(&self, stack: &Stack) -> Result<(), Error> {
        let mut stacks = self.stacks.lock().unwrap_or_else(|e| e.into_inner());
        stacks.insert((stack.project.clone(), stack.name.clone()), stack.clone());
        Ok(())
    }
}

/// [StackAligner] runs the outer stacking loop
pub struct StackAligner<'a, P: DailySolutionProvider> {
    provider: &'a P,
    store: &'a dyn StackStore,
    cfg: Config,
    pool: WorkerPool,
    jumps: HashMap<StationId, Vec<Jump>>,
}

impl<'a, P: DailySolutionProvider> StackAligner<'a, P> {
    /// Builds a new [StackAligner].
    /// ## Returns
    /// - [Error::Config] when `cfg` is not usable
    pub fn new(provider: &'a P, store: &'a dyn StackStore, cfg: Config) -> Result<Self, Error> {
        cfg.validate()?;
        let pool = WorkerPool::new(cfg.stack.workers);
        Ok(Self {
            provider,
            store,
            cfg,
            pool,
            jumps: HashMap::new(),
        })
    }

    /// Known discontinuities of this station, used by every trajectory fit
    pub fn with_jumps(mut self, station: StationId, jumps: Vec<Jump>) -> Self {
        self.jumps.insert(station, jumps);
        self
    }

    fn jumps(&self, station: &StationId) -> &[Jump] {
        self.jumps.get(station).map(|j| j.as_slice()).unwrap_or(&[])
    }

    /// Loads the previous [Stack] if any, and adds every day the provider knows of.
    fn prepare(&self, project: &str, name: &str) -> Result<Stack, Error> {
        let mut stack = match self.store.load(project, name)? {
            Some(stack) => {
                info!(
                    "{}/{}: resuming stack of {} days",
                    project,
                    name,
                    stack.polyhedra.len()
                );
                stack
            },
            None => Stack::new(project, name, Vec::new()),
        };

        for date in self.provider.dates(project)? {
            if stack.polyhedron(date).is_none() {
                let solutions = self.provider.network_solution(project, date)?;
                stack.add(Polyhedron::from_solutions(project, date, &solutions));
            }
        }
        Ok(stack)
    }

    /// Fits one trajectory per (not excluded) station. Stations that cannot be
    /// fitted are logged and left out.
    fn fit_etms(
        &self,
        stack: &Stack,
        from_ppp: bool,
        exclude: &HashSet<&StationId>,
    ) -> Result<HashMap<StationId, Etm>, Error> {
        let stations = stack
            .stations
            .iter()
            .filter(|station| !exclude.contains(station))
            .cloned()
            .collect::<Vec<_>>();

        let results = self.pool.map(stations, |station| {
            let series = if from_ppp {
                self.provider
                    .ppp_series(&station)
                    .map(|solutions| TimeSeries::from_solutions(&station, &solutions))
            } else {
                Ok(stack.series(&station))
            };
            let etm = series.and_then(|series| Etm::fit(&series, self.jumps(&station), &self.cfg.etm));
            (station, etm)
        })?;

        let mut etms = HashMap::with_capacity(results.len());
        for (station, etm) in results {
            match etm {
                Ok(etm) => {
                    etms.insert(station, etm);
                },
                Err(e) => warn!("{}: trajectory skipped: {}", station, e),
            }
        }
        Ok(etms)
    }

    /// Target of this day: modelled positions of every station covered by a trajectory
    fn target(&self, polyhedron: &Polyhedron, etms: &HashMap<StationId, Etm>) -> Polyhedron {
        let vertices = polyhedron
            .stations()
            .filter_map(|station| etms.get(station))
            .filter(|etm| etm.covers(polyhedron.date))
            .map(|etm| Vertex::new(etm.station.clone(), etm.evaluate(polyhedron.date)))
            .collect();
        Polyhedron::new(&polyhedron.project, polyhedron.date, vertices)
    }

    /// Runs the stacking loop.
    /// ## Input
    /// - project: project name
    /// - stack_name: [Stack] name, locked for the whole run
    /// - max_iters: outer iterations; polyhedrons are marked aligned on the last one
    /// - exclude: stations left out of trajectories and targets.
    ///   Their positions still belong to the stack.
    /// - constraints: optional [FrameConstraints]
    /// ## Returns
    /// - persisted [Stack]
    /// - [Error::StackLocked] if another run holds this stack
    /// - [Error::DateMismatch] (fatal) on corrupted bookkeeping
    pub fn run_stack(
        &self,
        project: &str,
        stack_name: &str,
        max_iters: usize,
        exclude: &[StationId],
        constraints: Option<&FrameConstraints>,
    ) -> Result<Stack, Error> {
        if max_iters == 0 {
            return Err(crate::cfg::Error::NoIterations.into());
        }

        let _lease = StackLease::acquire(self.store, project, stack_name)?;
        let mut stack = self.prepare(project, stack_name)?;
        let exclude = exclude.iter().collect::<HashSet<_>>();
        let irls = self.cfg.irls;

        info!(
            "{}/{}: stacking {} days, {} stations, {} iterations",
            project,
            stack_name,
            stack.polyhedra.len(),
            stack.stations.len(),
            max_iters
        );

        for iteration in 0..max_iters {
            let final_iteration = iteration + 1 == max_iters;
            let etms = self.fit_etms(&stack, iteration == 0, &exclude)?;

            let jobs = stack
                .polyhedra
                .iter()
                .enumerate()
                .filter(|(_, polyhedron)| !polyhedron.is_aligned())
                .map(|(index, polyhedron)| (index, polyhedron.clone(), self.target(polyhedron, &etms)))
                .collect::<Vec<_>>();

            debug!(
                "iteration #{}: {} trajectories, {} days to align",
                iteration,
                etms.len(),
                jobs.len()
            );

            let results = self.pool.map(jobs, |(index, mut polyhedron, target)| {
                let info = polyhedron.align(&target, final_iteration, &irls);
                (index, polyhedron, info)
            })?;

            let mut snapshot = IterationSnapshot {
                iteration,
                alignments: Vec::with_capacity(results.len()),
                skipped: Vec::new(),
            };

            for (index, polyhedron, info) in results {
                match info {
                    Ok(info) => {
                        stack.polyhedra[index] = polyhedron;
                        snapshot.alignments.push(info);
                    },
                    Err(e @ Error::DateMismatch { .. }) => {
                        error!("{}/{}: aborting: {}", project, stack_name, e);
                        return Err(e);
                    },
                    Err(e) => {
                        warn!("{} {}: alignment skipped: {}", project, polyhedron.date, e);
                        snapshot.skipped.push(polyhedron.date);
                    },
                }
            }

            let wrms = snapshot
                .alignments
                .iter()
                .map(|info| info.wrms_mm)
                .collect::<Vec<_>>();
            info!(
                "iteration #{}: {} aligned, {} skipped, median wrms={:.2}mm",
                iteration,
                snapshot.alignments.len(),
                snapshot.skipped.len(),
                percentile(&wrms, 50.0),
            );

            stack.transformations.push(snapshot);
        }

        let etms = self.fit_etms(&stack, false, &exclude)?;
        let mut etms = etms.into_values().collect::<Vec<_>>();
        etms.sort_by(|a, b| a.station.cmp(&b.station));
        stack.etms = etms;

        if let Some(constraints) = constraints {
            match estimate_frame_alignment(&stack.etms, constraints, &irls) {
                Ok(alignment) => {
                    align_to_frame(&mut stack.polyhedra, &alignment);
                    stack.frame_alignment = Some(alignment);
                },
                Err(e) => warn!(
                    "{}/{}: frame constraints ignored: {}",
                    project, stack_name, e
                ),
            }
        }

        let unaligned = stack.polyhedra.iter().filter(|p| !p.is_aligned()).count();
        if unaligned > 0 {
            warn!(
                "{}/{}: {} days could not be aligned",
                project, stack_name, unaligned
            );
        }

        self.store.save(&stack)?;
        Ok(stack)
    }
}
