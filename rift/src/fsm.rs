//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use smallvec::SmallVec;
use tracing::warn;

// Maximum size of the transition history ring.
const HISTORY_MAX_SIZE: usize = 64;

/// Static description of a deterministic finite state machine.
///
/// The transition table is a pure function from (state, event) to an
/// optional new state, a fixed list of actions, and a fixed list of events
/// to push onto the chained queue. Actions are values of a closed
/// enumeration; the harness never executes them. Instead, [`Fsm::step`]
/// returns the resolved action list and the owner dispatches each value
/// through a `match`, which keeps all side effects in the owning object.
pub trait StateMachine {
    type State: Copy + Eq + std::fmt::Debug;
    type Event: Clone + std::fmt::Debug;
    type Action: Copy + std::fmt::Debug + 'static;

    const INITIAL: Self::State;

    // Resolves one transition table entry. `None` means the event isn't
    // handled in this state.
    fn transition(
        state: Self::State,
        event: &Self::Event,
    ) -> Option<Transition<Self>>;

    // Actions implicitly executed when a state is entered or left.
    fn entry_actions(state: Self::State) -> &'static [Self::Action];
    fn exit_actions(state: Self::State) -> &'static [Self::Action];

    // Compact event label recorded in the history ring.
    fn event_name(event: &Self::Event) -> &'static str;

    // Verbose events (periodic ticks and the like) are kept out of the
    // history ring.
    fn event_is_verbose(_event: &Self::Event) -> bool {
        false
    }
}

// Result of a transition table lookup.
pub struct Transition<M: StateMachine + ?Sized> {
    // New state, or `None` to remain in the current state.
    pub next: Option<M::State>,
    // Actions associated with the transition itself.
    pub actions: &'static [M::Action],
    // Events pushed onto the chained queue, processed strictly after the
    // current transition completes.
    pub pushed: SmallVec<[M::Event; 2]>,
}

// One processed event, with the full ordered action list to dispatch:
// transition actions first, then exit actions of the old state and entry
// actions of the new state (when the state changed).
#[derive(Debug)]
pub struct Step<M: StateMachine> {
    pub event: M::Event,
    pub from: M::State,
    pub to: M::State,
    pub actions: SmallVec<[M::Action; 4]>,
}

// One entry of the transition history ring.
#[derive(Debug)]
pub struct HistoryEntry<M: StateMachine> {
    pub seq: u64,
    pub time: DateTime<Utc>,
    pub from: M::State,
    pub event: &'static str,
    pub to: M::State,
}

/// Deterministic state machine instance: current state, chained event
/// queue, and a bounded history of processed transitions.
#[derive(Debug)]
pub struct Fsm<M: StateMachine> {
    state: M::State,
    queue: VecDeque<M::Event>,
    history: VecDeque<HistoryEntry<M>>,
    transition_count: u64,
}

// ===== impl Transition =====

impl<M: StateMachine + ?Sized> Transition<M> {
    pub fn new(
        next: Option<M::State>,
        actions: &'static [M::Action],
    ) -> Transition<M> {
        Transition {
            next,
            actions,
            pushed: SmallVec::new(),
        }
    }

    pub fn with_pushed(
        next: Option<M::State>,
        actions: &'static [M::Action],
        pushed: impl IntoIterator<Item = M::Event>,
    ) -> Transition<M> {
        Transition {
            next,
            actions,
            pushed: pushed.into_iter().collect(),
        }
    }
}

// ===== impl Fsm =====

impl<M: StateMachine> Fsm<M> {
    pub fn new() -> Fsm<M> {
        Fsm {
            state: M::INITIAL,
            queue: VecDeque::new(),
            history: VecDeque::new(),
            transition_count: 0,
        }
    }

    pub fn state(&self) -> M::State {
        self.state
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    // Returns the entry actions of the initial state. The owner dispatches
    // them once when the state machine is started.
    pub fn begin(&self) -> &'static [M::Action] {
        M::entry_actions(M::INITIAL)
    }

    // Enqueues an event.
    pub fn push(&mut self, event: M::Event) {
        self.queue.push_back(event);
    }

    // Processes the next queued event, if any.
    //
    // The state is updated before the step is returned, so actions observe
    // the post-transition state when they run.
    pub fn step(&mut self) -> Option<Step<M>> {
        loop {
            let event = self.queue.pop_front()?;

            let Some(transition) = M::transition(self.state, &event) else {
                warn!(
                    state = ?self.state, event = ?event,
                    "unexpected FSM event"
                );
                continue;
            };

            let from = self.state;
            let to = transition.next.unwrap_or(from);
            let mut actions: SmallVec<[M::Action; 4]> =
                SmallVec::from_slice(transition.actions);
            // An explicit target state always runs exit and entry actions,
            // even when it equals the current state (re-entering a state is
            // how the tables express "reset in place").
            if transition.next.is_some() {
                actions.extend_from_slice(M::exit_actions(from));
                actions.extend_from_slice(M::entry_actions(to));
            }

            // Chained events run strictly after the current transition.
            for pushed in transition.pushed {
                self.queue.push_back(pushed);
            }

            // Effectively transition to the new state.
            self.state = to;
            self.transition_count += 1;

            // Record the transition in the history ring.
            if !M::event_is_verbose(&event) {
                self.history.push_front(HistoryEntry {
                    seq: self.transition_count,
                    time: Utc::now(),
                    from,
                    event: M::event_name(&event),
                    to,
                });
                self.history.truncate(HISTORY_MAX_SIZE);
            }

            return Some(Step {
                event,
                from,
                to,
                actions,
            });
        }
    }

    // Returns the transition history, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry<M>> {
        self.history.iter()
    }
}

impl<M: StateMachine> Default for Fsm<M> {
    fn default() -> Fsm<M> {
        Fsm::new()
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Toggle;

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum State {
        Off,
        On,
    }

    #[derive(Clone, Debug)]
    enum Event {
        Flip,
        Tick,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    enum Action {
        Blink,
        Arm,
        Disarm,
    }

    impl StateMachine for Toggle {
        type State = State;
        type Event = Event;
        type Action = Action;

        const INITIAL: State = State::Off;

        fn transition(
            state: State,
            event: &Event,
        ) -> Option<Transition<Self>> {
            match (state, event) {
                (State::Off, Event::Flip) => {
                    Some(Transition::new(Some(State::On), &[]))
                }
                (State::On, Event::Flip) => {
                    Some(Transition::new(Some(State::Off), &[]))
                }
                // A tick while on blinks and chains a flip.
                (State::On, Event::Tick) => Some(Transition::with_pushed(
                    None,
                    &[Action::Blink],
                    [Event::Flip],
                )),
                (State::Off, Event::Tick) => None,
            }
        }

        fn entry_actions(state: State) -> &'static [Action] {
            match state {
                State::On => &[Action::Arm],
                State::Off => &[],
            }
        }

        fn exit_actions(state: State) -> &'static [Action] {
            match state {
                State::On => &[Action::Disarm],
                State::Off => &[],
            }
        }

        fn event_name(event: &Event) -> &'static str {
            match event {
                Event::Flip => "Flip",
                Event::Tick => "Tick",
            }
        }

        fn event_is_verbose(event: &Event) -> bool {
            matches!(event, Event::Tick)
        }
    }

    #[test]
    fn chained_events_run_after_transition() {
        let mut fsm = Fsm::<Toggle>::new();
        fsm.push(Event::Flip);
        fsm.push(Event::Tick);

        // Flip: Off -> On, entry actions only.
        let step = fsm.step().unwrap();
        assert_eq!(step.to, State::On);
        assert_eq!(step.actions.as_slice(), &[Action::Arm]);

        // Tick: blink, chains a flip.
        let step = fsm.step().unwrap();
        assert_eq!(step.to, State::On);
        assert_eq!(step.actions.as_slice(), &[Action::Blink]);

        // Chained flip: On -> Off with exit actions.
        let step = fsm.step().unwrap();
        assert_eq!(step.to, State::Off);
        assert_eq!(step.actions.as_slice(), &[Action::Disarm]);

        assert!(fsm.step().is_none());
    }

    #[test]
    fn unhandled_events_are_skipped() {
        let mut fsm = Fsm::<Toggle>::new();
        fsm.push(Event::Tick);
        fsm.push(Event::Flip);

        // The tick isn't handled in the Off state; the flip still runs.
        let step = fsm.step().unwrap();
        assert_eq!(step.to, State::On);
    }

    #[test]
    fn history_excludes_verbose_events() {
        let mut fsm = Fsm::<Toggle>::new();
        fsm.push(Event::Flip);
        fsm.push(Event::Tick);
        while fsm.step().is_some() {}

        let history: Vec<_> =
            fsm.history().map(|entry| entry.event).collect();
        assert_eq!(history, vec!["Flip", "Flip"]);
    }
}
