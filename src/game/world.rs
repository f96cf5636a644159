//! Local World
//!
//! Everything the presentation loop owns: the local player's controls and one
//! set of controls per remote peer. Decoded messages are applied here; the
//! network session never touches this state.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::game::controls::{Intent, TiltControls};
use crate::network::protocol::{Message, PeerId};
use crate::network::session::{SessionError, SessionHandle};

/// Local player plus every known remote peer.
#[derive(Debug, Clone)]
pub struct LocalWorld {
    own_id: PeerId,
    player: TiltControls,
    peers: BTreeMap<PeerId, TiltControls>,
}

impl LocalWorld {
    /// Empty world for the peer `own_id`.
    pub fn new(own_id: PeerId) -> Self {
        Self {
            own_id,
            player: TiltControls::default(),
            peers: BTreeMap::new(),
        }
    }

    /// Our id.
    pub fn own_id(&self) -> PeerId {
        self.own_id
    }

    /// Local player.
    pub fn player(&self) -> &TiltControls {
        &self.player
    }

    /// Local player, mutable.
    pub fn player_mut(&mut self) -> &mut TiltControls {
        &mut self.player
    }

    /// Remote peer by id.
    pub fn peer(&self, id: &PeerId) -> Option<&TiltControls> {
        self.peers.get(id)
    }

    /// All remote peers.
    pub fn peers(&self) -> impl Iterator<Item = (&PeerId, &TiltControls)> {
        self.peers.iter()
    }

    /// Number of remote peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Apply one decoded message. Returns the reply to send, if any.
    pub fn apply(&mut self, msg: Message) -> Option<Message> {
        match msg {
            Message::Hello => None,
            Message::Welcome { to_id } => {
                if to_id != self.own_id && !self.peers.contains_key(&to_id) {
                    info!("Player {} joined", to_id.short());
                    self.peers.insert(to_id, TiltControls::default());
                }
                None
            }
            Message::GetState { from_id } => {
                Some(Message::Sync(self.player.snapshot(self.own_id, from_id)))
            }
            Message::Sync(sync) => {
                if sync.to_id != self.own_id {
                    debug!("Sync for {} received but not asked for", sync.to_id.short());
                    return None;
                }
                self.peers
                    .entry(sync.from_id)
                    .or_insert_with(|| {
                        info!("Player {} instantiated", sync.from_id.short());
                        TiltControls::default()
                    })
                    .apply_snapshot(&sync);
                None
            }
            Message::Left { from_id } => {
                if self.peers.remove(&from_id).is_some() {
                    info!("Player {} left", from_id.short());
                }
                None
            }
            Message::TurningRight { .. }
            | Message::TurningLeft { .. }
            | Message::WalkingForward { .. }
            | Message::WalkingBackward { .. } => {
                if let Some((from_id, intent, state)) = Intent::from_message(&msg) {
                    match self.peers.get_mut(&from_id) {
                        Some(controls) => {
                            controls.set_intent(intent, state);
                        }
                        None => warn!("{:?} from unknown player {}", intent, from_id.short()),
                    }
                }
                None
            }
        }
    }

    /// Change a local intent. Returns the message to send when it actually
    /// changed.
    pub fn set_intent(&mut self, intent: Intent, pressed: bool) -> Option<Message> {
        self.player
            .set_intent(intent, pressed)
            .then(|| intent.message(self.own_id, pressed))
    }

    /// Integrate the local player and every peer.
    pub fn update(&mut self, dt: f32) {
        self.player.update(dt);
        for controls in self.peers.values_mut() {
            controls.update(dt);
        }
    }

    /// Drain every queued message from `session`, apply it, and write replies.
    /// Returns the number of messages applied.
    pub fn drain(&mut self, session: &SessionHandle) -> Result<usize, SessionError> {
        let mut applied = 0;
        while let Some(msg) = session.try_recv() {
            applied += 1;
            if let Some(reply) = self.apply(msg) {
                session.send(&reply)?;
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::SyncState;

    const ME: PeerId = PeerId::new([0xAA; 16]);
    const OTHER: PeerId = PeerId::new([0xBB; 16]);

    fn sync(from_id: PeerId, to_id: PeerId) -> SyncState {
        SyncState {
            from_id,
            to_id,
            position: [4.0, 0.0, 2.0],
            direction: [0.0, 1.0],
            speed: 5.0,
            rotation_speed: 2.0,
            is_turning_right: false,
            is_turning_left: false,
            is_walking_forward: true,
            is_walking_backward: false,
        }
    }

    #[test]
    fn test_welcome_creates_peer_once() {
        let mut world = LocalWorld::new(ME);

        assert_eq!(world.apply(Message::Welcome { to_id: OTHER }), None);
        world.apply(Message::Welcome { to_id: OTHER });
        world.apply(Message::Welcome { to_id: ME });

        assert_eq!(world.peer_count(), 1);
        assert_eq!(world.peer(&OTHER), Some(&TiltControls::default()));
    }

    #[test]
    fn test_get_state_replies_with_sync() {
        let mut world = LocalWorld::new(ME);
        world.player_mut().position = [1.0, 0.0, 3.0];

        let reply = world.apply(Message::GetState { from_id: OTHER });

        match reply {
            Some(Message::Sync(sync)) => {
                assert_eq!(sync.from_id, ME);
                assert_eq!(sync.to_id, OTHER);
                assert_eq!(sync.position, [1.0, 0.0, 3.0]);
            }
            other => panic!("expected Sync, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_creates_and_overwrites_peer() {
        let mut world = LocalWorld::new(ME);

        world.apply(Message::Sync(sync(OTHER, ME)));

        let peer = world.peer(&OTHER).unwrap();
        assert_eq!(peer.position, [4.0, 0.0, 2.0]);
        assert_eq!(peer.speed, 5.0);
        assert!(peer.is_walking_forward);
    }

    #[test]
    fn test_sync_for_someone_else_ignored() {
        let mut world = LocalWorld::new(ME);
        let third = PeerId::new([0xCC; 16]);

        world.apply(Message::Sync(sync(OTHER, third)));

        assert_eq!(world.peer_count(), 0);
    }

    #[test]
    fn test_left_removes_peer() {
        let mut world = LocalWorld::new(ME);
        world.apply(Message::Welcome { to_id: OTHER });

        world.apply(Message::Left { from_id: OTHER });
        world.apply(Message::Left { from_id: OTHER });

        assert_eq!(world.peer_count(), 0);
    }

    #[test]
    fn test_intents_apply_to_known_peers_only() {
        let mut world = LocalWorld::new(ME);
        world.apply(Message::Welcome { to_id: OTHER });

        world.apply(Message::TurningLeft { from_id: OTHER, state: true });
        world.apply(Message::WalkingBackward { from_id: PeerId::new([1; 16]), state: true });

        assert!(world.peer(&OTHER).unwrap().is_turning_left);
        assert_eq!(world.peer_count(), 1);
    }

    #[test]
    fn test_set_intent_is_edge_triggered() {
        let mut world = LocalWorld::new(ME);

        assert_eq!(
            world.set_intent(Intent::WalkForward, true),
            Some(Message::WalkingForward { from_id: ME, state: true })
        );
        assert_eq!(world.set_intent(Intent::WalkForward, true), None);
        assert_eq!(
            world.set_intent(Intent::WalkForward, false),
            Some(Message::WalkingForward { from_id: ME, state: false })
        );
    }

    #[test]
    fn test_update_moves_player_and_peers() {
        let mut world = LocalWorld::new(ME);
        world.apply(Message::Sync(sync(OTHER, ME)));
        world.set_intent(Intent::WalkForward, true);

        world.update(1.0);

        assert_eq!(world.player().position, [10.0, 0.0, 0.0]);
        assert_eq!(world.peer(&OTHER).unwrap().position, [4.0, 0.0, 7.0]);
    }
}
