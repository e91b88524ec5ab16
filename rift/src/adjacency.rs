//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::error::LieRejectError;
use crate::fsm::{StateMachine, Transition};
use crate::packet::consts::UNDEFINED_OR_ANY_POD;
use crate::packet::pdu::{Header, LieNeighbor, LiePacket};
use crate::packet::{Level, LinkDirection, SystemId};

// Neighbor captured from the most recent accepted LIE on an interface.
#[derive(Clone, Debug)]
pub struct Neighbor {
    pub name: Option<String>,
    pub system_id: SystemId,
    pub level: Level,
    pub address: SocketAddr,
    pub flood_port: u16,
    // Link ID on the neighbor's side of the link.
    pub remote_id: u32,
    pub holdtime: u16,
    pub leaf_2_leaf: bool,
    // Us, as reflected by the neighbor (if any).
    pub reflected: Option<LieNeighbor>,
}

// LIE FSM marker type.
#[derive(Debug)]
pub enum LieFsm {}

// States of the per-link adjacency state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LieState {
    OneWay,
    TwoWay,
    ThreeWay,
}

// Data attached to a received LIE.
#[derive(Clone, Debug)]
pub struct LieInput {
    pub hdr: Header,
    pub lie: LiePacket,
    pub src: SocketAddr,
}

// Events of the per-link adjacency state machine.
#[derive(Clone, Debug)]
pub enum LieEvent {
    // One-second timer tick.
    TimerTick,
    // Node's level has been changed by ZTP or configuration.
    LevelChanged(Option<Level>),
    // Best HAL computed by ZTP has changed.
    HalChanged(Option<Level>),
    // HAT computed by ZTP has changed.
    HatChanged(Option<Level>),
    // Set of HAL offering systems computed by ZTP has changed.
    HalsChanged,
    // Received LIE on the interface.
    LieReceived(Box<LieInput>),
    // New neighbor seen on the received LIE.
    NewNeighbor,
    // Received valid reflection of this node from the neighbor.
    ValidReflection,
    // Lost previously seen reflection from the neighbor.
    NeighborDroppedReflection,
    // Neighbor changed advertised level.
    NeighborChangedLevel,
    // Neighbor changed IP address.
    NeighborChangedAddress,
    // Minor fields (flood port, name, local link ID) changed.
    NeighborChangedMinorFields,
    // Unacceptable header seen.
    UnacceptableHeader,
    // Adjacency hold time expired.
    HoldTimeExpired,
    // More than one neighbor seen on the interface.
    MultipleNeighbors,
    // Corrupted LIE seen.
    LieCorrupt,
    // Send a LIE out.
    SendLie,
}

// Closed set of actions dispatched by the interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LieAction {
    UpdateLevel,
    StoreHal,
    StoreHat,
    StoreHals,
    ProcessLie,
    SendLie,
    Cleanup,
    CheckHoldTime,
    ExpireOffer,
    StartFlooding,
    StopFlooding,
}

// ===== impl LieFsm =====

impl StateMachine for LieFsm {
    type State = LieState;
    type Event = LieEvent;
    type Action = LieAction;

    const INITIAL: LieState = LieState::OneWay;

    fn transition(
        state: LieState,
        event: &LieEvent,
    ) -> Option<Transition<Self>> {
        use LieAction as A;
        use LieEvent as E;
        use LieState as S;

        let transition = match (state, event) {
            // Transitions common to all states.
            (_, E::TimerTick) => {
                let actions: &[A] = match state {
                    S::OneWay => &[],
                    S::TwoWay | S::ThreeWay => &[A::CheckHoldTime],
                };
                Transition::with_pushed(None, actions, [E::SendLie])
            }
            (_, E::HalChanged(..)) => Transition::new(None, &[A::StoreHal]),
            (_, E::HatChanged(..)) => Transition::new(None, &[A::StoreHat]),
            (_, E::HalsChanged) => Transition::new(None, &[A::StoreHals]),
            (_, E::LieReceived(..)) => {
                Transition::new(None, &[A::ProcessLie])
            }
            (_, E::SendLie) => Transition::new(None, &[A::SendLie]),
            (_, E::UnacceptableHeader) => {
                Transition::new(Some(S::OneWay), &[])
            }

            // One-way state.
            (S::OneWay, E::LevelChanged(..)) => Transition::with_pushed(
                Some(S::OneWay),
                &[A::UpdateLevel],
                [E::SendLie],
            ),
            (S::OneWay, E::NewNeighbor) => Transition::with_pushed(
                Some(S::TwoWay),
                &[],
                [E::SendLie],
            ),
            (S::OneWay, E::HoldTimeExpired) => {
                Transition::new(None, &[A::ExpireOffer])
            }

            // Two-way state.
            (S::TwoWay, E::LevelChanged(..)) => {
                Transition::new(Some(S::OneWay), &[A::UpdateLevel])
            }
            (S::TwoWay, E::ValidReflection) => {
                Transition::new(Some(S::ThreeWay), &[])
            }

            // Three-way state.
            (S::ThreeWay, E::LevelChanged(..)) => {
                Transition::new(Some(S::OneWay), &[A::UpdateLevel])
            }
            (S::ThreeWay, E::NeighborDroppedReflection) => {
                Transition::new(Some(S::TwoWay), &[])
            }

            // Adjacency resets common to the two-way and three-way states.
            (
                S::TwoWay | S::ThreeWay,
                E::NeighborChangedLevel
                | E::NeighborChangedAddress
                | E::MultipleNeighbors
                | E::LieCorrupt,
            ) => Transition::new(Some(S::OneWay), &[]),
            (S::TwoWay | S::ThreeWay, E::HoldTimeExpired) => {
                Transition::new(Some(S::OneWay), &[A::ExpireOffer])
            }
            (
                S::TwoWay | S::ThreeWay,
                E::NeighborChangedMinorFields,
            ) => Transition::new(None, &[]),

            _ => return None,
        };
        Some(transition)
    }

    fn entry_actions(state: LieState) -> &'static [LieAction] {
        match state {
            LieState::OneWay => &[LieAction::Cleanup, LieAction::SendLie],
            LieState::TwoWay => &[],
            LieState::ThreeWay => &[LieAction::StartFlooding],
        }
    }

    fn exit_actions(state: LieState) -> &'static [LieAction] {
        match state {
            LieState::ThreeWay => &[LieAction::StopFlooding],
            LieState::OneWay | LieState::TwoWay => &[],
        }
    }

    fn event_name(event: &LieEvent) -> &'static str {
        match event {
            LieEvent::TimerTick => "TimerTick",
            LieEvent::LevelChanged(..) => "LevelChanged",
            LieEvent::HalChanged(..) => "HalChanged",
            LieEvent::HatChanged(..) => "HatChanged",
            LieEvent::HalsChanged => "HalsChanged",
            LieEvent::LieReceived(..) => "LieReceived",
            LieEvent::NewNeighbor => "NewNeighbor",
            LieEvent::ValidReflection => "ValidReflection",
            LieEvent::NeighborDroppedReflection => {
                "NeighborDroppedReflection"
            }
            LieEvent::NeighborChangedLevel => "NeighborChangedLevel",
            LieEvent::NeighborChangedAddress => "NeighborChangedAddress",
            LieEvent::NeighborChangedMinorFields => {
                "NeighborChangedMinorFields"
            }
            LieEvent::UnacceptableHeader => "UnacceptableHeader",
            LieEvent::HoldTimeExpired => "HoldTimeExpired",
            LieEvent::MultipleNeighbors => "MultipleNeighbors",
            LieEvent::LieCorrupt => "LieCorrupt",
            LieEvent::SendLie => "SendLie",
        }
    }

    fn event_is_verbose(event: &LieEvent) -> bool {
        matches!(
            event,
            LieEvent::TimerTick
                | LieEvent::LieReceived(..)
                | LieEvent::SendLie
        )
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(input: &LieInput) -> Neighbor {
        Neighbor {
            name: input.lie.name.clone(),
            system_id: input.hdr.sender,
            // Only set once the LIE passed the acceptance rules, which
            // guarantee a defined level.
            level: input.hdr.level.unwrap_or(Level::LEAF),
            address: input.src,
            flood_port: input.lie.flood_port,
            remote_id: input.lie.local_id,
            holdtime: input.lie.holdtime,
            leaf_2_leaf: input.lie.capabilities.leaf_2_leaf,
            reflected: input.lie.neighbor,
        }
    }

    pub fn is_top_of_fabric(&self) -> bool {
        self.level == Level::TOP_OF_FABRIC
    }

    // Direction of this neighbor relative to the given local level.
    pub fn direction(&self, my_level: Level) -> LinkDirection {
        if self.level > my_level {
            LinkDirection::North
        } else if self.level < my_level {
            LinkDirection::South
        } else {
            LinkDirection::EastWest
        }
    }
}

// Reasons for accepting a received LIE, recorded for inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LieAcceptReason {
    LeafAndHatNotGreater,
    NotLeafAndRemoteLeaf,
    LeafToLeaf,
    LevelDiffAtMostOne,
}

impl std::fmt::Display for LieAcceptReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LieAcceptReason::LeafAndHatNotGreater => {
                write!(f, "this node is leaf and HAT not greater than remote level")
            }
            LieAcceptReason::NotLeafAndRemoteLeaf => {
                write!(f, "this node is not leaf and neighbor is leaf")
            }
            LieAcceptReason::LeafToLeaf => {
                write!(f, "both nodes are leaf and support leaf-2-leaf")
            }
            LieAcceptReason::LevelDiffAtMostOne => {
                write!(f, "neither node is leaf and level difference is at most one")
            }
        }
    }
}

// Inputs of the LIE acceptance rules that come from the node rather than
// the interface.
#[derive(Clone, Copy, Debug)]
pub struct LieAcceptanceCtx {
    pub system_id: SystemId,
    pub level: Option<Level>,
    pub hat: Option<Level>,
    pub leaf_2_leaf: bool,
}

// Checks whether a received LIE is acceptable for the purpose of
// progressing towards a three-way adjacency.
//
// The rules are ordered; the first matching one wins.
pub(crate) fn check_lie_acceptance(
    ctx: &LieAcceptanceCtx,
    mtu: u32,
    pod: u32,
    hdr: &Header,
    lie: &LiePacket,
) -> Result<LieAcceptReason, LieRejectError> {
    // Reject rules. The version check already happened at decode time.
    if !hdr.sender.is_valid() {
        return Err(LieRejectError::InvalidSystemId);
    }
    if hdr.sender == ctx.system_id {
        return Err(LieRejectError::SelfLoop);
    }
    if lie.link_mtu_size != Some(mtu) {
        return Err(LieRejectError::MtuMismatch);
    }
    let Some(remote_level) = hdr.level else {
        return Err(LieRejectError::RemoteLevelUndefined);
    };
    let Some(my_level) = ctx.level else {
        return Err(LieRejectError::MyLevelUndefined);
    };
    if pod != UNDEFINED_OR_ANY_POD
        && lie.pod != UNDEFINED_OR_ANY_POD
        && pod != lie.pod
    {
        return Err(LieRejectError::PodMismatch);
    }

    // Accept rules. Leaf-to-leaf adjacencies are governed exclusively by
    // the leaf-2-leaf rule below.
    if my_level.is_leaf()
        && !remote_level.is_leaf()
        && ctx.hat.is_none_or(|hat| hat <= remote_level)
    {
        return Ok(LieAcceptReason::LeafAndHatNotGreater);
    }
    if !my_level.is_leaf() && remote_level.is_leaf() {
        return Ok(LieAcceptReason::NotLeafAndRemoteLeaf);
    }
    if my_level.is_leaf()
        && remote_level.is_leaf()
        && ctx.leaf_2_leaf
        && lie.capabilities.leaf_2_leaf
    {
        return Ok(LieAcceptReason::LeafToLeaf);
    }
    if !my_level.is_leaf()
        && !remote_level.is_leaf()
        && my_level.difference(remote_level) <= 1
    {
        return Ok(LieAcceptReason::LevelDiffAtMostOne);
    }

    Err(LieRejectError::LevelMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::consts::VERSION;

    fn ctx(level: Option<u8>) -> LieAcceptanceCtx {
        LieAcceptanceCtx {
            system_id: SystemId::from(1),
            level: level.map(Level::from),
            hat: None,
            leaf_2_leaf: false,
        }
    }

    fn lie_from(sender: u64, level: Option<u8>) -> (Header, LiePacket) {
        let hdr = Header {
            major_version: VERSION,
            sender: SystemId::from(sender),
            level: level.map(Level::from),
        };
        let lie = LiePacket {
            name: None,
            local_id: 1,
            flood_port: 10001,
            link_mtu_size: Some(1400),
            neighbor: None,
            pod: 0,
            nonce: 0,
            capabilities: Default::default(),
            holdtime: 3,
            not_a_ztp_offer: false,
            you_are_flood_repeater: true,
        };
        (hdr, lie)
    }

    #[test]
    fn acceptance_reject_rules() {
        let (hdr, lie) = lie_from(0, Some(1));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Err(LieRejectError::InvalidSystemId)
        );

        let (hdr, lie) = lie_from(1, Some(1));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Err(LieRejectError::SelfLoop)
        );

        let (hdr, mut lie) = lie_from(2, Some(1));
        lie.link_mtu_size = Some(1500);
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Err(LieRejectError::MtuMismatch)
        );

        let (hdr, lie) = lie_from(2, None);
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Err(LieRejectError::RemoteLevelUndefined)
        );

        let (hdr, lie) = lie_from(2, Some(1));
        assert_eq!(
            check_lie_acceptance(&ctx(None), 1400, 0, &hdr, &lie),
            Err(LieRejectError::MyLevelUndefined)
        );

        let (hdr, mut lie) = lie_from(2, Some(1));
        lie.pod = 7;
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 3, &hdr, &lie),
            Err(LieRejectError::PodMismatch)
        );
    }

    #[test]
    fn acceptance_accept_rules() {
        // Leaf accepts a higher-level neighbor when HAT doesn't exceed it.
        let (hdr, lie) = lie_from(2, Some(1));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Ok(LieAcceptReason::LeafAndHatNotGreater)
        );

        // Non-leaf accepts a leaf neighbor.
        let (hdr, lie) = lie_from(2, Some(0));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(1)), 1400, 0, &hdr, &lie),
            Ok(LieAcceptReason::NotLeafAndRemoteLeaf)
        );

        // Non-leaves within one level of each other.
        let (hdr, lie) = lie_from(2, Some(3));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(2)), 1400, 0, &hdr, &lie),
            Ok(LieAcceptReason::LevelDiffAtMostOne)
        );
    }

    #[test]
    fn acceptance_leaf_to_leaf() {
        let mut my = ctx(Some(0));
        my.hat = Some(Level::from(24));
        my.leaf_2_leaf = true;
        let (hdr, mut lie) = lie_from(2, Some(0));
        lie.capabilities.leaf_2_leaf = true;
        assert_eq!(
            check_lie_acceptance(&my, 1400, 0, &hdr, &lie),
            Ok(LieAcceptReason::LeafToLeaf)
        );

        // Without the capability on both sides the LIE is rejected.
        lie.capabilities.leaf_2_leaf = false;
        assert_eq!(
            check_lie_acceptance(&my, 1400, 0, &hdr, &lie),
            Err(LieRejectError::LevelMismatch)
        );
    }

    #[test]
    fn two_leaves_stall_in_level_mismatch() {
        // Two plain leaves without leaf-2-leaf support never accept each
        // other's LIEs.
        let (hdr, lie) = lie_from(2, Some(0));
        assert_eq!(
            check_lie_acceptance(&ctx(Some(0)), 1400, 0, &hdr, &lie),
            Err(LieRejectError::LevelMismatch)
        );
    }

    #[test]
    fn leaf_rejects_lower_offer_than_hat() {
        // A leaf that already formed a three-way adjacency at level 24
        // rejects LIEs from lower-level spines.
        let mut my = ctx(Some(0));
        my.hat = Some(Level::from(24));
        let (hdr, lie) = lie_from(2, Some(1));
        assert_eq!(
            check_lie_acceptance(&my, 1400, 0, &hdr, &lie),
            Err(LieRejectError::LevelMismatch)
        );
    }
}
