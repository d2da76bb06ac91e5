use std::collections::{HashMap, HashSet};

use ccu_schemas::{Command, ModuleType, NavigationSource, Step, StepChain};

use crate::FlowDefinition;

/// Compiled steps for one order, split by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductionDefinition {
    pub navigation_steps: Vec<Step>,
    pub production_steps: Vec<Step>,
}

impl ProductionDefinition {
    pub fn is_empty(&self) -> bool {
        self.navigation_steps.is_empty() && self.production_steps.is_empty()
    }

    /// Merge both lists into one chain ordered by dependency.
    ///
    /// The head is the step whose dependency is absent or external; the rest
    /// follow the dependent pointers. Anything unreachable from the head is
    /// appended in generation order.
    pub fn into_chain(self) -> StepChain {
        let all: Vec<Step> = self
            .navigation_steps
            .into_iter()
            .chain(self.production_steps)
            .collect();
        let ids: HashSet<String> = all.iter().map(|s| s.id.clone()).collect();

        let mut next_of: HashMap<String, usize> = HashMap::new();
        let mut head = None;
        for (i, s) in all.iter().enumerate() {
            match &s.dependent_action_id {
                Some(dep) if ids.contains(dep) => {
                    next_of.insert(dep.clone(), i);
                }
                _ => {
                    if head.is_none() {
                        head = Some(i);
                    }
                }
            }
        }

        let mut order: Vec<usize> = Vec::with_capacity(all.len());
        let mut seen = vec![false; all.len()];
        let mut cursor = head;
        while let Some(i) = cursor {
            if seen[i] {
                break;
            }
            seen[i] = true;
            order.push(i);
            cursor = next_of.get(&all[i].id).copied();
        }
        order.extend((0..all.len()).filter(|i| !seen[*i]));

        let mut slots: Vec<Option<Step>> = all.into_iter().map(Some).collect();
        StepChain::new(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }
}

/// Processing command a station runs between PICK and DROP, if any.
pub fn station_command(module_type: ModuleType) -> Option<Command> {
    match module_type {
        ModuleType::Mill => Some(Command::Mill),
        ModuleType::Drill => Some(Command::Drill),
        ModuleType::Oven => Some(Command::Fire),
        ModuleType::Aiqs => Some(Command::CheckQuality),
        ModuleType::Hbw | ModuleType::Dps | ModuleType::Chrg => None,
    }
}

struct ChainBuilder {
    def: ProductionDefinition,
    last_id: Option<String>,
}

impl ChainBuilder {
    fn new(first_dependency: Option<String>) -> Self {
        Self {
            def: ProductionDefinition::default(),
            last_id: first_dependency,
        }
    }

    fn navigate(&mut self, source: NavigationSource, target: ModuleType) {
        let step = Step::navigation(source, target, self.last_id.take());
        self.last_id = Some(step.id.clone());
        self.def.navigation_steps.push(step);
    }

    fn manufacture(&mut self, module_type: ModuleType, command: Command) {
        let step = Step::manufacture(module_type, command, self.last_id.take());
        self.last_id = Some(step.id.clone());
        self.def.production_steps.push(step);
    }
}

/// Expand a production flow:
///
/// ```text
/// START → HBW, HBW DROP
/// for each station:  prev → station, PICK, [station command], DROP
/// last → DPS, DPS PICK
/// ```
///
/// `first_dependency` becomes the predecessor of the opening navigation step.
pub fn compile_production(
    flow: &FlowDefinition,
    first_dependency: Option<String>,
) -> ProductionDefinition {
    let mut b = ChainBuilder::new(first_dependency);

    b.navigate(NavigationSource::Start, ModuleType::Hbw);
    b.manufacture(ModuleType::Hbw, Command::Drop);

    let mut prev = ModuleType::Hbw;
    for &station in &flow.steps {
        b.navigate(NavigationSource::Module(prev), station);
        b.manufacture(station, Command::Pick);
        if let Some(cmd) = station_command(station) {
            b.manufacture(station, cmd);
        }
        b.manufacture(station, Command::Drop);
        prev = station;
    }

    b.navigate(NavigationSource::Module(prev), ModuleType::Dps);
    b.manufacture(ModuleType::Dps, Command::Pick);

    b.def
}

/// Fixed storage route: START → DPS, DPS DROP, DPS → HBW, HBW PICK.
pub fn compile_storage() -> ProductionDefinition {
    let mut b = ChainBuilder::new(None);
    b.navigate(NavigationSource::Start, ModuleType::Dps);
    b.manufacture(ModuleType::Dps, Command::Drop);
    b.navigate(NavigationSource::Module(ModuleType::Dps), ModuleType::Hbw);
    b.manufacture(ModuleType::Hbw, Command::Pick);
    b.def
}
