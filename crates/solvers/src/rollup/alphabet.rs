//! The alphabet module contains an implementation of the [Machine] trait for the alphabet
//! machine, a toy program used for local runs and tests.

use super::{hash_chain, BlockReason, ExecutionAssertion, Machine, TimeBounds};
use ethers::{
    abi::{self, Token},
    types::{Bytes, H256, U256},
    utils::keccak256,
};

/// The number of letters the alphabet machine cycles through.
const ALPHABET_LEN: u8 = 26;

/// The [AlphabetMachine] walks the alphabet forever. Every consonant appends itself to the log.
/// Every vowel is an inbox instruction: it imports all supplied messages, echoing them as
/// outgoing messages, at most once per assertion. A vowel with nothing left to import blocks the
/// machine on the inbox until the upper time bound. Once that timeout has passed, the next
/// execution reads the empty inbox and moves on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlphabetMachine {
    /// The index of the next letter.
    pc: u8,
    /// The digest of everything the machine has processed.
    digest: H256,
    /// Why the last execution stopped early. Not part of the machine hash.
    last_block_reason: Option<BlockReason>,
}

impl AlphabetMachine {
    /// Creates a new [AlphabetMachine] about to execute the letter at `pc`.
    pub fn starting_at(pc: u8) -> Self {
        Self {
            pc: pc % ALPHABET_LEN,
            ..Default::default()
        }
    }

    /// The letter the machine executes next.
    pub fn letter(&self) -> u8 {
        b'a' + self.pc
    }

    fn is_vowel(letter: u8) -> bool {
        matches!(letter, b'a' | b'e' | b'i' | b'o' | b'u')
    }
}

impl Machine for AlphabetMachine {
    fn hash(&self) -> H256 {
        H256::from(keccak256(abi::encode(&[
            Token::Uint(U256::from(self.pc)),
            Token::FixedBytes(self.digest.as_bytes().to_vec()),
        ])))
    }

    fn execute_assertion(
        &mut self,
        max_steps: u64,
        time_bounds: &TimeBounds,
        messages: &[Bytes],
    ) -> (ExecutionAssertion, u64) {
        let mut assertion = ExecutionAssertion::default();
        let mut steps_run = 0;
        let timed_out = match self.last_block_reason.take() {
            Some(BlockReason::Inbox { timeout }) => time_bounds.start >= timeout,
            _ => false,
        };

        while steps_run < max_steps {
            let letter = self.letter();
            if Self::is_vowel(letter) {
                if assertion.did_inbox_insn || (messages.is_empty() && !timed_out) {
                    self.last_block_reason = Some(BlockReason::Inbox {
                        timeout: time_bounds.end,
                    });
                    break;
                }
                for message in messages {
                    self.digest = hash_chain(self.digest, message);
                    assertion.out_msgs.push(message.clone());
                }
                assertion.did_inbox_insn = true;
            } else {
                self.digest = hash_chain(self.digest, &[letter]);
                assertion.logs.push(Bytes::from(vec![letter]));
            }
            self.pc = (self.pc + 1) % ALPHABET_LEN;
            steps_run += 1;
        }

        assertion.after_hash = self.hash();
        assertion.num_gas = steps_run;
        (assertion, steps_run)
    }

    fn last_block_reason(&self) -> Option<BlockReason> {
        self.last_block_reason.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn bounds() -> TimeBounds {
        TimeBounds::starting_at(5, 10)
    }

    #[test]
    fn consonants_are_logged() {
        let mut machine = AlphabetMachine::starting_at(1);
        let (assertion, steps_run) = machine.execute_assertion(3, &bounds(), &[]);
        assert_eq!(steps_run, 3);
        assert_eq!(
            assertion.logs,
            vec![
                Bytes::from_static(b"b"),
                Bytes::from_static(b"c"),
                Bytes::from_static(b"d")
            ]
        );
        assert!(!assertion.did_inbox_insn);
        assert_eq!(machine.letter(), b'e');
        assert_eq!(machine.last_block_reason(), None);
    }

    #[test]
    fn vowel_without_messages_blocks() {
        let mut machine = AlphabetMachine::default();
        let before = machine.hash();
        let (assertion, steps_run) = machine.execute_assertion(10, &bounds(), &[]);
        assert_eq!(steps_run, 0);
        assert_eq!(assertion.after_hash, before);
        assert_eq!(
            machine.last_block_reason(),
            Some(BlockReason::Inbox { timeout: 15 })
        );

        assert!(machine.is_blocked(14, false));
        assert!(!machine.is_blocked(14, true));
        assert!(!machine.is_blocked(15, false));
    }

    #[test]
    fn empty_inbox_is_read_after_timeout() {
        let mut machine = AlphabetMachine::default();
        machine.execute_assertion(10, &TimeBounds::starting_at(0, 10), &[]);
        let blocked_hash = machine.hash();

        // Still before the timeout, the machine keeps waiting.
        let (_, steps_run) = machine.execute_assertion(10, &TimeBounds::starting_at(9, 10), &[]);
        assert_eq!(steps_run, 0);
        assert_eq!(
            machine.last_block_reason(),
            Some(BlockReason::Inbox { timeout: 19 })
        );

        let (assertion, steps_run) =
            machine.execute_assertion(10, &TimeBounds::starting_at(19, 10), &[]);
        // 'a' reads nothing, 'b' to 'd' log, and 'e' blocks again.
        assert_eq!(steps_run, 4);
        assert!(assertion.did_inbox_insn);
        assert!(assertion.out_msgs.is_empty());
        assert_ne!(machine.hash(), blocked_hash);
        assert_eq!(machine.letter(), b'e');
        assert_eq!(
            machine.last_block_reason(),
            Some(BlockReason::Inbox { timeout: 29 })
        );
    }

    #[test]
    fn inbox_read_happens_once_per_assertion() {
        let mut machine = AlphabetMachine::default();
        let messages = [Bytes::from_static(b"m")];
        let (assertion, steps_run) = machine.execute_assertion(100, &bounds(), &messages);
        assert_eq!(steps_run, 4);
        assert!(assertion.did_inbox_insn);
        assert_eq!(assertion.out_msgs, messages.to_vec());
        assert_eq!(machine.letter(), b'e');

        let (_, steps_run) = machine.execute_assertion(100, &bounds(), &messages);
        assert_eq!(steps_run, 4);
        assert_eq!(machine.letter(), b'i');
    }

    #[test]
    fn wraps_around_the_alphabet() {
        let mut machine = AlphabetMachine::starting_at(21);
        let (_, steps_run) = machine.execute_assertion(100, &bounds(), &[Bytes::from_static(b"m")]);
        // 'v' to 'z' log, 'a' reads the inbox, 'b' to 'd' log, 'e' blocks.
        assert_eq!(steps_run, 9);
        assert_eq!(machine.letter(), b'e');
    }

    #[test]
    fn hash_ignores_block_reason() {
        let mut blocked = AlphabetMachine::default();
        blocked.execute_assertion(1, &bounds(), &[]);
        assert_eq!(blocked.hash(), AlphabetMachine::default().hash());
    }
}
