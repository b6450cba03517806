use super::types::{Action, State};

/// A single legal move in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionDef {
    pub from: State,
    pub on: Action,
    pub target: State,
}

const fn tr(from: State, on: Action, target: State) -> TransitionDef {
    TransitionDef { from, on, target }
}

/// Every `(state, action) -> next` pair the engine knows about.
/// `AWAITING_PAYMENT` onward is wired for the payment step but no handler enters it yet.
pub const TRANSITIONS: &[TransitionDef] = &[
    tr(State::Start, Action::Greet, State::MainMenu),
    tr(State::MainMenu, Action::BuyData, State::SelectingNetwork),
    tr(State::MainMenu, Action::BuyAirtime, State::SelectingPlan),
    tr(State::SelectingNetwork, Action::SelectNetwork, State::SelectingPlan),
    tr(State::SelectingNetwork, Action::Cancel, State::MainMenu),
    tr(State::SelectingPlan, Action::SelectPlan, State::EnterPhone),
    tr(State::SelectingPlan, Action::Cancel, State::MainMenu),
    tr(State::EnterPhone, Action::SubmitPhone, State::AwaitingPayment),
    tr(State::EnterPhone, Action::Cancel, State::MainMenu),
    tr(State::AwaitingPayment, Action::PaymentConfirmed, State::Done),
    tr(State::AwaitingPayment, Action::PaymentFailed, State::Error),
    tr(State::AwaitingPayment, Action::Cancel, State::MainMenu),
    tr(State::Done, Action::Restart, State::MainMenu),
    tr(State::Error, Action::Restart, State::MainMenu),
];

/// Look up the next state. Illegal actions leave the state unchanged.
pub fn transition(current: State, action: Action) -> State {
    transition_in(TRANSITIONS, current, action)
}

/// Same as [`transition`] against an arbitrary table.
pub fn transition_in(table: &[TransitionDef], current: State, action: Action) -> State {
    table
        .iter()
        .find(|t| t.from == current && t.on == action)
        .map_or(current, |t| t.target)
}

/// Actions that are legal from `state`, in table order.
pub fn legal_actions(state: State) -> Vec<Action> {
    TRANSITIONS
        .iter()
        .filter(|t| t.from == state)
        .map(|t| t.on)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [Action; 11] = [
        Action::Greet,
        Action::BuyData,
        Action::BuyAirtime,
        Action::Support,
        Action::SelectNetwork,
        Action::SelectPlan,
        Action::SubmitPhone,
        Action::PaymentConfirmed,
        Action::PaymentFailed,
        Action::Cancel,
        Action::Restart,
    ];

    #[test]
    fn legal_purchase_path() {
        let mut state = State::Start;
        for action in [
            Action::Greet,
            Action::BuyData,
            Action::SelectNetwork,
            Action::SelectPlan,
            Action::SubmitPhone,
            Action::PaymentConfirmed,
            Action::Restart,
        ] {
            state = transition(state, action);
        }
        assert_eq!(state, State::MainMenu);
    }

    #[test]
    fn airtime_reuses_plan_selection() {
        assert_eq!(
            transition(State::MainMenu, Action::BuyAirtime),
            State::SelectingPlan
        );
    }

    #[test]
    fn absent_pairs_are_identity() {
        for state in State::ALL {
            for action in ALL_ACTIONS {
                let defined = TRANSITIONS.iter().any(|t| t.from == state && t.on == action);
                if !defined {
                    assert_eq!(
                        transition(state, action),
                        state,
                        "{state} --{action}--> should stay put"
                    );
                }
            }
        }
    }

    #[test]
    fn support_never_moves() {
        for state in State::ALL {
            assert_eq!(transition(state, Action::Support), state);
        }
    }

    #[test]
    fn table_has_no_duplicate_keys() {
        for (i, a) in TRANSITIONS.iter().enumerate() {
            for b in &TRANSITIONS[i + 1..] {
                assert!(
                    !(a.from == b.from && a.on == b.on),
                    "duplicate key {} / {}",
                    a.from,
                    a.on
                );
            }
        }
    }

    #[test]
    fn legal_actions_from_menu() {
        assert_eq!(
            legal_actions(State::MainMenu),
            vec![Action::BuyData, Action::BuyAirtime]
        );
        assert!(legal_actions(State::SelectingNetwork).contains(&Action::Cancel));
    }

    #[test]
    fn empty_table_always_stays() {
        assert_eq!(
            transition_in(&[], State::MainMenu, Action::BuyData),
            State::MainMenu
        );
    }
}
