//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use serde::{Deserialize, Serialize};

use crate::adjacency::LieState;
use crate::fsm::{StateMachine, Transition};
use crate::instance::InstanceUpView;
use crate::packet::{Level, SystemId};

// Hold-down time after losing the HAL, in seconds.
pub const HOLD_DOWN_TIME: u64 = 3;

// Symbolic level configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(try_from = "serde_yaml::Value")]
pub enum LevelSymbol {
    // Level is derived through ZTP.
    #[default]
    Undefined,
    // Hard-configured leaf, without leaf-2-leaf procedures.
    Leaf,
    // Hard-configured leaf, using leaf-2-leaf procedures.
    LeafToLeaf,
    // Hard-configured top-of-fabric.
    TopOfFabric,
    // Hard-configured numeric level.
    Value(u8),
}

// Per-interface snapshot of a neighbor's advertised level, as considered by
// the ZTP state machine.
#[derive(Clone, Debug)]
pub struct Offer {
    pub interface: String,
    pub system_id: SystemId,
    pub level: Option<Level>,
    pub not_a_ztp_offer: bool,
    // Adjacency state observed when the offer was received.
    pub state: LieState,
    // Removed offers are ignored but retained for diagnostics.
    pub removed: bool,
    pub removed_reason: Option<OfferRemovedReason>,
    pub best: bool,
    pub best_three_way: bool,
}

// Reason an offer was removed from consideration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OfferRemovedReason {
    NotAZtpOffer,
    UndefinedLevel,
    LeafLevel,
    HoldTimeExpired,
    Purged,
}

// Offer advertised by this node, recorded for diagnostics.
#[derive(Clone, Debug)]
pub struct TxOffer {
    pub interface: String,
    pub system_id: SystemId,
    pub level: Option<Level>,
    pub not_a_ztp_offer: bool,
    pub state: LieState,
}

// ZTP FSM marker type.
#[derive(Debug)]
pub enum ZtpFsm {}

// States of the level-election state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ZtpState {
    ComputeBestOffer,
    UpdatingClients,
    HoldingDown,
}

// Events of the level-election state machine.
#[derive(Clone, Debug)]
pub enum ZtpEvent {
    ChangeLocalConfiguredLevel(LevelSymbol),
    NeighborOffer(Offer),
    BetterHal,
    BetterHat,
    LostHal,
    LostHat,
    ComputationDone,
    HoldDownExpired,
}

// Closed set of actions dispatched by the instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ZtpAction {
    StoreLevel,
    UpdateOrRemoveOffer,
    LevelCompute,
    StartHoldDownTimer,
    StopHoldDownTimer,
    PurgeOffers,
    UpdateAllLieFsms,
}

// ===== impl LevelSymbol =====

impl LevelSymbol {
    // Whether automatic level derivation is active.
    pub const fn ztp_enabled(&self) -> bool {
        matches!(self, LevelSymbol::Undefined)
    }

    pub const fn is_leaf(&self) -> bool {
        matches!(self, LevelSymbol::Leaf | LevelSymbol::LeafToLeaf)
    }

    pub const fn leaf_2_leaf(&self) -> bool {
        matches!(self, LevelSymbol::LeafToLeaf)
    }
}

impl TryFrom<serde_yaml::Value> for LevelSymbol {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        match value {
            serde_yaml::Value::String(symbol) => match symbol.as_str() {
                "undefined" => Ok(LevelSymbol::Undefined),
                "leaf" => Ok(LevelSymbol::Leaf),
                "leaf-2-leaf" => Ok(LevelSymbol::LeafToLeaf),
                "top-of-fabric" => Ok(LevelSymbol::TopOfFabric),
                _ => Err(format!("invalid level symbol: {symbol}")),
            },
            serde_yaml::Value::Number(number) => number
                .as_u64()
                .filter(|level| *level <= u8::MAX as u64)
                .map(|level| LevelSymbol::Value(level as u8))
                .ok_or_else(|| format!("invalid level value: {number}")),
            _ => Err("invalid level".to_owned()),
        }
    }
}

impl std::fmt::Display for LevelSymbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelSymbol::Undefined => write!(f, "undefined"),
            LevelSymbol::Leaf => write!(f, "leaf"),
            LevelSymbol::LeafToLeaf => write!(f, "leaf-2-leaf"),
            LevelSymbol::TopOfFabric => write!(f, "top-of-fabric"),
            LevelSymbol::Value(level) => write!(f, "{level}"),
        }
    }
}

// ===== impl OfferRemovedReason =====

impl std::fmt::Display for OfferRemovedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfferRemovedReason::NotAZtpOffer => {
                write!(f, "not-a-ZTP-offer flag set")
            }
            OfferRemovedReason::UndefinedLevel => {
                write!(f, "level is undefined")
            }
            OfferRemovedReason::LeafLevel => {
                write!(f, "level is leaf")
            }
            OfferRemovedReason::HoldTimeExpired => {
                write!(f, "hold-time expired")
            }
            OfferRemovedReason::Purged => {
                write!(f, "purged")
            }
        }
    }
}

// ===== impl ZtpFsm =====

impl StateMachine for ZtpFsm {
    type State = ZtpState;
    type Event = ZtpEvent;
    type Action = ZtpAction;

    const INITIAL: ZtpState = ZtpState::ComputeBestOffer;

    fn transition(
        state: ZtpState,
        event: &ZtpEvent,
    ) -> Option<Transition<Self>> {
        use ZtpAction as A;
        use ZtpEvent as E;
        use ZtpState as S;

        let transition = match (state, event) {
            (_, E::NeighborOffer(..)) => {
                Transition::new(None, &[A::UpdateOrRemoveOffer])
            }

            // Updating-clients state.
            (S::UpdatingClients, E::ChangeLocalConfiguredLevel(..)) => {
                Transition::new(Some(S::ComputeBestOffer), &[A::StoreLevel])
            }
            (S::UpdatingClients, E::BetterHal | E::BetterHat | E::LostHat) => {
                Transition::new(Some(S::ComputeBestOffer), &[])
            }
            (S::UpdatingClients, E::LostHal) => Transition::new(
                Some(S::HoldingDown),
                &[A::StartHoldDownTimer],
            ),

            // Holding-down state.
            (S::HoldingDown, E::ChangeLocalConfiguredLevel(..)) => {
                Transition::new(Some(S::ComputeBestOffer), &[A::StoreLevel])
            }
            (
                S::HoldingDown,
                E::BetterHal
                | E::BetterHat
                | E::LostHal
                | E::LostHat
                | E::ComputationDone,
            ) => Transition::new(None, &[]),
            (S::HoldingDown, E::HoldDownExpired) => {
                Transition::new(Some(S::ComputeBestOffer), &[A::PurgeOffers])
            }

            // Compute-best-offer state.
            (S::ComputeBestOffer, E::ChangeLocalConfiguredLevel(..)) => {
                Transition::new(None, &[A::StoreLevel, A::LevelCompute])
            }
            (S::ComputeBestOffer, E::BetterHal | E::BetterHat | E::LostHat) => {
                Transition::new(None, &[A::LevelCompute])
            }
            (S::ComputeBestOffer, E::LostHal) => Transition::new(
                Some(S::HoldingDown),
                &[A::StartHoldDownTimer],
            ),
            (S::ComputeBestOffer, E::ComputationDone) => {
                Transition::new(Some(S::UpdatingClients), &[])
            }

            _ => return None,
        };
        Some(transition)
    }

    fn entry_actions(state: ZtpState) -> &'static [ZtpAction] {
        match state {
            ZtpState::UpdatingClients => &[ZtpAction::UpdateAllLieFsms],
            ZtpState::ComputeBestOffer => {
                &[ZtpAction::StopHoldDownTimer, ZtpAction::LevelCompute]
            }
            ZtpState::HoldingDown => &[],
        }
    }

    fn exit_actions(_state: ZtpState) -> &'static [ZtpAction] {
        &[]
    }

    fn event_name(event: &ZtpEvent) -> &'static str {
        match event {
            ZtpEvent::ChangeLocalConfiguredLevel(..) => {
                "ChangeLocalConfiguredLevel"
            }
            ZtpEvent::NeighborOffer(..) => "NeighborOffer",
            ZtpEvent::BetterHal => "BetterHal",
            ZtpEvent::BetterHat => "BetterHat",
            ZtpEvent::LostHal => "LostHal",
            ZtpEvent::LostHat => "LostHat",
            ZtpEvent::ComputationDone => "ComputationDone",
            ZtpEvent::HoldDownExpired => "HoldDownExpired",
        }
    }

    fn event_is_verbose(event: &ZtpEvent) -> bool {
        matches!(event, ZtpEvent::NeighborOffer(..))
    }
}

// ===== global functions =====

// Picks the better of two offers, optionally restricted to offers whose
// source adjacency is in the three-way state. Higher level wins; ties are
// broken by the numerically smaller system ID.
pub(crate) fn better_offer<'a>(
    offer1: Option<&'a Offer>,
    offer2: Option<&'a Offer>,
    three_way_only: bool,
) -> Option<&'a Offer> {
    let usable = |offer: &&Offer| {
        !offer.removed
            && !offer.not_a_ztp_offer
            && (!three_way_only || offer.state == LieState::ThreeWay)
    };
    let offer1 = offer1.filter(usable);
    let offer2 = offer2.filter(usable);
    match (offer1, offer2) {
        (None, offer2) => offer2,
        (offer1, None) => offer1,
        (Some(o1), Some(o2)) => {
            if o1.level > o2.level {
                Some(o1)
            } else if o2.level > o1.level {
                Some(o2)
            } else if o1.system_id < o2.system_id {
                Some(o1)
            } else {
                Some(o2)
            }
        }
    }
}

// Applies the offer-table removal rules and stores the offer, triggering a
// best-offer comparison when the outcome might have changed.
pub(crate) fn update_or_remove_offer(
    instance: &mut InstanceUpView<'_>,
    mut offer: Offer,
) {
    let removed_reason = if offer.not_a_ztp_offer {
        Some(OfferRemovedReason::NotAZtpOffer)
    } else if offer.level.is_none() {
        Some(OfferRemovedReason::UndefinedLevel)
    } else if offer.level.unwrap().is_leaf() {
        Some(OfferRemovedReason::LeafLevel)
    } else {
        None
    };

    let state = &mut *instance.state;
    let old_offer = state.rx_offers.get(&offer.interface);
    let compare_needed = match removed_reason {
        Some(reason) => {
            offer.removed = true;
            offer.removed_reason = Some(reason);
            // A removed offer needs a new comparison only if it replaces a
            // live one.
            old_offer.is_some_and(|old| !old.removed)
        }
        None => match old_offer {
            Some(old) => {
                old.removed
                    || old.system_id != offer.system_id
                    || old.level != offer.level
                    || old.not_a_ztp_offer != offer.not_a_ztp_offer
                    || old.state != offer.state
            }
            None => true,
        },
    };
    if !compare_needed && let Some(old) = old_offer {
        offer.best = old.best;
        offer.best_three_way = old.best_three_way;
    }
    state.rx_offers.insert(offer.interface.clone(), offer);
    if compare_needed {
        compare_offers(instance);
    }
}

// Expires the offer received on the given interface.
pub(crate) fn expire_offer(instance: &mut InstanceUpView<'_>, ifname: &str) {
    let state = &mut *instance.state;
    let Some(offer) = state.rx_offers.get_mut(ifname) else {
        return;
    };
    let compare_needed = !offer.removed;
    offer.removed = true;
    offer.removed_reason = Some(OfferRemovedReason::HoldTimeExpired);
    if compare_needed {
        compare_offers(instance);
    }
}

// Marks all offers as removed.
pub(crate) fn purge_offers(instance: &mut InstanceUpView<'_>) {
    for offer in instance.state.rx_offers.values_mut() {
        if !offer.removed {
            offer.removed = true;
            offer.removed_reason = Some(OfferRemovedReason::Purged);
        }
    }
}

// Selects the best offer and the best three-way offer, and pushes HAL/HAT
// change events when the result differs from the currently stored values.
pub(crate) fn compare_offers(instance: &mut InstanceUpView<'_>) {
    let state = &mut *instance.state;

    let mut best: Option<&Offer> = None;
    let mut best_three_way: Option<&Offer> = None;
    for offer in state.rx_offers.values() {
        best = better_offer(best, Some(offer), false);
        best_three_way = better_offer(best_three_way, Some(offer), true);
    }

    let hal = best.and_then(|offer| offer.level);
    let hat = best_three_way.and_then(|offer| offer.level);
    let best_ifname = best.map(|offer| offer.interface.clone());
    let best_three_way_ifname =
        best_three_way.map(|offer| offer.interface.clone());

    // Update the flags on the offers.
    for offer in state.rx_offers.values_mut() {
        offer.best = Some(&offer.interface) == best_ifname.as_ref();
        offer.best_three_way =
            Some(&offer.interface) == best_three_way_ifname.as_ref();
    }

    // Push events when HAL or HAT would change; the new values are only
    // stored by the level computation.
    if state.hal != hal {
        match hal {
            Some(..) => state.ztp_fsm.push(ZtpEvent::BetterHal),
            None => state.ztp_fsm.push(ZtpEvent::LostHal),
        }
    }
    if state.hat != hat {
        match hat {
            Some(..) => state.ztp_fsm.push(ZtpEvent::BetterHat),
            None => state.ztp_fsm.push(ZtpEvent::LostHat),
        }
    }
}

// Stores the best offers as the new HAL and HAT and signals the completion
// of the computation.
pub(crate) fn level_compute(instance: &mut InstanceUpView<'_>) {
    let state = &mut *instance.state;

    let mut hal = None;
    let mut hat = None;
    for offer in state.rx_offers.values() {
        if offer.best {
            hal = offer.level;
        }
        if offer.best_three_way {
            hat = offer.level;
        }
    }
    state.hal = hal;
    state.hat = hat;
    state.ztp_fsm.push(ZtpEvent::ComputationDone);
}

// Derives the level from the HAL (`max(HAL - 1, 0)`), or undefined when no
// HAL is known.
pub(crate) fn derive_level(hal: Option<Level>) -> Option<Level> {
    hal.map(|hal| hal.predecessor())
}

// Whether any known southbound adjacency exists: a live offer from a node
// with a numerically lower level than ours.
pub(crate) fn any_southbound_adjacencies(
    instance: &InstanceUpView<'_>,
) -> bool {
    let Some(my_level) = instance.level_value() else {
        return false;
    };
    instance
        .state
        .rx_offers
        .values()
        .filter(|offer| !offer.removed)
        .filter_map(|offer| offer.level)
        .any(|level| level < my_level)
}

// Poison reverse: a LIE sent on the given interface must carry the
// `not_a_ztp_offer` flag iff ZTP is active and the node's level was derived
// from the offer received on that same interface.
pub(crate) fn send_not_a_ztp_offer_on_intf(
    instance: &InstanceUpView<'_>,
    ifname: &str,
) -> bool {
    if !instance.config.level.ztp_enabled() {
        return false;
    }
    match instance.state.rx_offers.get(ifname) {
        Some(offer) if !offer.removed => offer.level == instance.state.hal,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(
        interface: &str,
        system_id: u64,
        level: Option<u8>,
        state: LieState,
    ) -> Offer {
        Offer {
            interface: interface.to_owned(),
            system_id: SystemId::from(system_id),
            level: level.map(Level::from),
            not_a_ztp_offer: false,
            state,
            removed: false,
            removed_reason: None,
            best: false,
            best_three_way: false,
        }
    }

    #[test]
    fn higher_level_wins() {
        let o1 = offer("if1", 1, Some(24), LieState::TwoWay);
        let o2 = offer("if2", 2, Some(23), LieState::ThreeWay);
        let best = better_offer(Some(&o1), Some(&o2), false).unwrap();
        assert_eq!(best.interface, "if1");
    }

    #[test]
    fn lower_system_id_breaks_ties() {
        let o1 = offer("if1", 7, Some(24), LieState::TwoWay);
        let o2 = offer("if2", 2, Some(24), LieState::TwoWay);
        let best = better_offer(Some(&o1), Some(&o2), false).unwrap();
        assert_eq!(best.interface, "if2");
    }

    #[test]
    fn three_way_filter() {
        let o1 = offer("if1", 1, Some(24), LieState::TwoWay);
        let o2 = offer("if2", 2, Some(23), LieState::ThreeWay);
        let best = better_offer(Some(&o1), Some(&o2), true).unwrap();
        assert_eq!(best.interface, "if2");
    }

    #[test]
    fn removed_and_poisoned_offers_are_skipped() {
        let mut o1 = offer("if1", 1, Some(24), LieState::ThreeWay);
        o1.removed = true;
        let mut o2 = offer("if2", 2, Some(23), LieState::ThreeWay);
        o2.not_a_ztp_offer = true;
        assert!(better_offer(Some(&o1), Some(&o2), false).is_none());
    }

    #[test]
    fn derived_level_is_hal_minus_one() {
        assert_eq!(derive_level(None), None);
        assert_eq!(
            derive_level(Some(Level::from(24))),
            Some(Level::from(23))
        );
        assert_eq!(derive_level(Some(Level::LEAF)), Some(Level::LEAF));
    }
}
