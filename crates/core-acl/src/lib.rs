//! Session access control filter.
//!
//! A stateful filter sitting between the network and the paint pipeline.
//! `AclState::handle` inspects one message: meta ACL messages mutate the
//! filter's own state and report which aspect changed; command messages are
//! checked against user locks, layer locks and feature tiers. The result is
//! a bitmask: `FILTERED` means "drop this message", and the change bits tell
//! the UI to refresh its permission views. Callers OR results over a batch
//! and fire a single change notification afterwards.
//!
//! Rules of thumb encoded below:
//! * Context id 0 is the server; it bypasses every check.
//! * Operators bypass locks and tiers but still count as state mutations.
//! * ACL-changing meta messages are themselves operator-only.
//! * Internal messages are never filtered.

use core_message::{CommandBody, ContextId, Message, MessageBody};
use tracing::trace;

bitflags::bitflags! {
    /// Result bits of one `handle` call. `FILTERED` is 0x01 as observed at
    /// the engine boundary; the remaining bits form `CHANGE_MASK`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AclResult: u8 {
        const FILTERED = 0x01;
        const USERS_CHANGED = 0x02;
        const LAYERS_CHANGED = 0x04;
        const FEATURES_CHANGED = 0x08;
    }
}

/// Bits that report filter-state changes to the UI.
pub const CHANGE_MASK: u8 = 0x0e;

/// Access tiers, strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Operator = 0,
    Trusted = 1,
    Everyone = 2,
}

impl Tier {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Tier::Operator,
            1 => Tier::Trusted,
            _ => Tier::Everyone,
        }
    }
}

/// Tier-gated features. The order is the wire order of
/// `FeatureAccessLevels`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    PutImage = 0,
    Resize = 1,
    Background = 2,
    EditLayers = 3,
    OwnLayers = 4,
    Annotations = 5,
    Laser = 6,
    Undo = 7,
    Metadata = 8,
    Timeline = 9,
}

pub const FEATURE_COUNT: usize = 10;

#[derive(Debug, Clone, Default)]
struct LayerAcl {
    locked: bool,
    exclusive: Vec<ContextId>,
}

#[derive(Debug)]
pub struct AclState {
    operators: [bool; 256],
    trusted: [bool; 256],
    locked_users: [bool; 256],
    layers: Vec<(u16, LayerAcl)>,
    feature_tiers: [Tier; FEATURE_COUNT],
}

impl Default for AclState {
    fn default() -> Self {
        Self::new()
    }
}

impl AclState {
    /// Fresh filter: nobody is operator, everything defaults to
    /// everyone-accessible except layer editing and session shape.
    pub fn new() -> Self {
        let mut feature_tiers = [Tier::Everyone; FEATURE_COUNT];
        feature_tiers[Feature::Resize as usize] = Tier::Operator;
        feature_tiers[Feature::Background as usize] = Tier::Operator;
        feature_tiers[Feature::EditLayers as usize] = Tier::Operator;
        feature_tiers[Feature::Timeline as usize] = Tier::Operator;
        feature_tiers[Feature::Metadata as usize] = Tier::Trusted;
        Self {
            operators: [false; 256],
            trusted: [false; 256],
            locked_users: [false; 256],
            layers: Vec::new(),
            feature_tiers,
        }
    }

    pub fn is_operator(&self, user: ContextId) -> bool {
        user == 0 || self.operators[usize::from(user)]
    }

    fn tier_of(&self, user: ContextId) -> Tier {
        if self.is_operator(user) {
            Tier::Operator
        } else if self.trusted[usize::from(user)] {
            Tier::Trusted
        } else {
            Tier::Everyone
        }
    }

    fn allows(&self, user: ContextId, feature: Feature) -> bool {
        self.tier_of(user) <= self.feature_tiers[feature as usize]
    }

    fn layer_acl(&self, layer_id: u16) -> Option<&LayerAcl> {
        self.layers.iter().find(|(id, _)| *id == layer_id).map(|(_, acl)| acl)
    }

    fn layer_blocks(&self, user: ContextId, layer_id: u16) -> bool {
        if self.is_operator(user) {
            return false;
        }
        match self.layer_acl(layer_id) {
            Some(acl) => {
                acl.locked || (!acl.exclusive.is_empty() && !acl.exclusive.contains(&user))
            }
            None => false,
        }
    }

    /// Run one message through the filter. Mutates filter state for meta
    /// ACL messages; never touches the message itself.
    pub fn handle(&mut self, msg: &Message) -> AclResult {
        let user = msg.context_id();
        let result = match msg.body() {
            MessageBody::Internal(_) => AclResult::empty(),
            MessageBody::SessionOwner { users } => {
                self.set_user_bits(UserBits::Operators, users, user)
            }
            MessageBody::TrustedUsers { users } => {
                self.set_user_bits(UserBits::Trusted, users, user)
            }
            MessageBody::UserAcl { locked } => {
                self.set_user_bits(UserBits::Locked, locked, user)
            }
            MessageBody::LayerAcl { layer_id, locked, exclusive } => {
                if !self.is_operator(user) {
                    AclResult::FILTERED
                } else {
                    self.set_layer_acl(*layer_id, *locked, exclusive.clone());
                    AclResult::LAYERS_CHANGED
                }
            }
            MessageBody::FeatureAccessLevels { tiers } => {
                if !self.is_operator(user) {
                    AclResult::FILTERED
                } else {
                    for (slot, &raw) in self.feature_tiers.iter_mut().zip(tiers.iter()) {
                        *slot = Tier::from_u8(raw);
                    }
                    AclResult::FEATURES_CHANGED
                }
            }
            MessageBody::DefaultLayer { .. } => {
                if self.is_operator(user) {
                    AclResult::empty()
                } else {
                    AclResult::FILTERED
                }
            }
            MessageBody::LaserTrail { .. } => {
                if self.allows(user, Feature::Laser) {
                    AclResult::empty()
                } else {
                    AclResult::FILTERED
                }
            }
            MessageBody::MovePointer { .. } | MessageBody::Chat { .. } => AclResult::empty(),
            MessageBody::Command(command) => self.handle_command(user, command),
        };
        if result.contains(AclResult::FILTERED) {
            trace!(target: "acl", user, type_id = msg.type_id(), "filtered");
        }
        result
    }

    fn handle_command(&mut self, user: ContextId, command: &CommandBody) -> AclResult {
        if user != 0 && self.locked_users[usize::from(user)] && !self.is_operator(user) {
            return AclResult::FILTERED;
        }
        let allowed = match command {
            CommandBody::CanvasResize { .. } => self.allows(user, Feature::Resize),
            CommandBody::CanvasBackground { .. } => self.allows(user, Feature::Background),
            CommandBody::LayerCreate { layer_id, .. }
            | CommandBody::LayerAttributes { layer_id, .. }
            | CommandBody::LayerRetitle { layer_id, .. }
            | CommandBody::LayerMove { layer_id, .. }
            | CommandBody::LayerDelete { layer_id } => {
                // Layers prefixed with the user's own context id fall under
                // the own-layers tier instead of general layer editing.
                let own = (layer_id >> 8) as u8 == user;
                self.allows(
                    user,
                    if own { Feature::OwnLayers } else { Feature::EditLayers },
                )
            }
            CommandBody::PutTile { layer_id, .. } => {
                self.allows(user, Feature::PutImage) && !self.layer_blocks(user, *layer_id)
            }
            CommandBody::FillRect { layer_id, .. } => {
                self.allows(user, Feature::PutImage) && !self.layer_blocks(user, *layer_id)
            }
            CommandBody::AnnotationCreate { .. }
            | CommandBody::AnnotationReshape { .. }
            | CommandBody::AnnotationEdit { .. }
            | CommandBody::AnnotationDelete { .. } => self.allows(user, Feature::Annotations),
            CommandBody::SetMetadata { .. } => self.allows(user, Feature::Metadata),
            CommandBody::SetTimeline { .. } => self.allows(user, Feature::Timeline),
            CommandBody::Undo | CommandBody::UndoPoint => self.allows(user, Feature::Undo),
            CommandBody::DrawDabsClassic(d) => !self.layer_blocks(user, d.layer_id),
            CommandBody::DrawDabsPixel(d) | CommandBody::DrawDabsPixelSquare(d) => {
                !self.layer_blocks(user, d.layer_id)
            }
            CommandBody::DrawDabsMyPaint(d) => !self.layer_blocks(user, d.layer_id),
            CommandBody::PenUp => true,
        };
        if allowed {
            AclResult::empty()
        } else {
            AclResult::FILTERED
        }
    }

    fn set_layer_acl(&mut self, layer_id: u16, locked: bool, exclusive: Vec<ContextId>) {
        let acl = LayerAcl { locked, exclusive };
        match self.layers.iter_mut().find(|(id, _)| *id == layer_id) {
            Some((_, slot)) => *slot = acl,
            None => self.layers.push((layer_id, acl)),
        }
    }

    fn set_user_bits(
        &mut self,
        which: UserBits,
        users: &[ContextId],
        sender: ContextId,
    ) -> AclResult {
        if !self.is_operator(sender) {
            return AclResult::FILTERED;
        }
        let bits = match which {
            UserBits::Operators => &mut self.operators,
            UserBits::Trusted => &mut self.trusted,
            UserBits::Locked => &mut self.locked_users,
        };
        bits.fill(false);
        for &u in users {
            bits[usize::from(u)] = true;
        }
        AclResult::USERS_CHANGED
    }
}

enum UserBits {
    Operators,
    Trusted,
    Locked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_message::{DrawDabsPixel, InternalMessage, PixelDab};

    fn dabs(user: ContextId, layer_id: u16) -> std::sync::Arc<Message> {
        Message::command(
            user,
            CommandBody::DrawDabsPixel(DrawDabsPixel {
                layer_id,
                x: 0,
                y: 0,
                color: 0,
                blend_mode: core_message::BlendMode::Normal,
                indirect: false,
                dabs: vec![PixelDab { x: 0, y: 0, size: 1, opacity: 255 }],
            }),
        )
    }

    #[test]
    fn internal_is_never_filtered() {
        let mut acl = AclState::new();
        let msg = Message::internal(200, InternalMessage::Reset);
        assert_eq!(acl.handle(&msg), AclResult::empty());
    }

    #[test]
    fn locked_user_commands_are_filtered() {
        let mut acl = AclState::new();
        let lock = Message::new(0, MessageBody::UserAcl { locked: vec![5] });
        assert_eq!(acl.handle(&lock), AclResult::USERS_CHANGED);
        assert!(acl.handle(&dabs(5, 1)).contains(AclResult::FILTERED));
        assert_eq!(acl.handle(&dabs(6, 1)), AclResult::empty());
    }

    #[test]
    fn layer_lock_blocks_non_operators() {
        let mut acl = AclState::new();
        let owner = Message::new(0, MessageBody::SessionOwner { users: vec![1] });
        assert_eq!(acl.handle(&owner), AclResult::USERS_CHANGED);
        let lock = Message::new(
            1,
            MessageBody::LayerAcl { layer_id: 7, locked: true, exclusive: vec![] },
        );
        assert_eq!(acl.handle(&lock), AclResult::LAYERS_CHANGED);
        assert!(acl.handle(&dabs(9, 7)).contains(AclResult::FILTERED));
        // Operator draws through the lock.
        assert_eq!(acl.handle(&dabs(1, 7)), AclResult::empty());
    }

    #[test]
    fn acl_changes_from_non_operators_are_filtered() {
        let mut acl = AclState::new();
        let grab = Message::new(9, MessageBody::SessionOwner { users: vec![9] });
        assert!(acl.handle(&grab).contains(AclResult::FILTERED));
        assert!(!acl.is_operator(9));
    }

    #[test]
    fn feature_tiers_gate_commands() {
        let mut acl = AclState::new();
        // Resize defaults to operator-only.
        let resize = Message::command(
            4,
            CommandBody::CanvasResize { top: 0, right: 10, bottom: 10, left: 0 },
        );
        assert!(acl.handle(&resize).contains(AclResult::FILTERED));
        // Server (context 0) may do anything.
        let server_resize = Message::command(
            0,
            CommandBody::CanvasResize { top: 0, right: 10, bottom: 10, left: 0 },
        );
        assert_eq!(acl.handle(&server_resize), AclResult::empty());
    }

    #[test]
    fn layer_move_follows_layer_edit_tiers() {
        let mut acl = AclState::new();
        // Someone else's layer: edit-layers tier, operator-only by default.
        let foreign = Message::command(4, CommandBody::LayerMove { layer_id: 0x0301, index: 0 });
        assert!(acl.handle(&foreign).contains(AclResult::FILTERED));
        // The user's own layer falls under the own-layers tier.
        let own = Message::command(4, CommandBody::LayerMove { layer_id: 0x0401, index: 0 });
        assert_eq!(acl.handle(&own), AclResult::empty());
    }

    #[test]
    fn exclusive_layer_access() {
        let mut acl = AclState::new();
        let msg = Message::new(
            0,
            MessageBody::LayerAcl { layer_id: 3, locked: false, exclusive: vec![2] },
        );
        acl.handle(&msg);
        assert_eq!(acl.handle(&dabs(2, 3)), AclResult::empty());
        assert!(acl.handle(&dabs(4, 3)).contains(AclResult::FILTERED));
    }
}
