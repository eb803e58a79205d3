//! Canned response generator — offline replies drawn from topic-keyed pools.
//!
//! Serves as the primary responder in offline mode and as the fallback when
//! the remote model fails. It re-runs the risk classifier on every call so it
//! is safe to invoke on its own.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::classifier::{normalize, RiskClassifier};
use crate::models::{Message, ResponseDraft, SafetyFlag, Sender, SuggestedTopic};

/// Fixed crisis-resource message. Returned verbatim whenever crisis language is seen.
pub const CRISIS_RESPONSE: &str = "I'm really glad you told me, and I'm so sorry you're carrying this much pain right now. \
You deserve support from a real person immediately. \
Please call or text 988 to reach the Suicide & Crisis Lifeline (US), available 24/7, \
or text HOME to 741741 to reach the Crisis Text Line. \
If you are in immediate danger, call 911 or go to the nearest emergency room. \
If you're outside the US, please contact your local emergency number. \
You don't have to go through this alone.";

/// Topic groups in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Anxiety,
    Sleep,
    Stress,
    Sadness,
    Greeting,
    Gratitude,
    Work,
    Relationships,
    Default,
}

impl Topic {
    pub const PRIORITY: [Topic; 8] = [
        Topic::Anxiety,
        Topic::Sleep,
        Topic::Stress,
        Topic::Sadness,
        Topic::Greeting,
        Topic::Gratitude,
        Topic::Work,
        Topic::Relationships,
    ];

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Topic::Anxiety => &[
                "anxious", "anxiety", "panic", "panicking", "panicked", "nervous", "worried",
                "worry", "worrying", "scared", "afraid", "on edge", "heart racing",
            ],
            Topic::Sleep => &[
                "sleep", "sleeping", "asleep", "insomnia", "awake", "tired", "exhausted",
                "nightmare", "nightmares", "3am", "restless",
            ],
            Topic::Stress => &[
                "stress", "stressed", "stressful", "overwhelmed", "overwhelming", "pressure",
                "too much", "burnt out", "burned out", "burnout",
            ],
            Topic::Sadness => &[
                "sad", "down", "depressed", "lonely", "alone", "crying", "cry", "hopeless",
                "empty", "miserable", "heartbroken",
            ],
            Topic::Greeting => &[
                "hi", "hello", "hey", "good morning", "good afternoon", "good evening", "howdy",
            ],
            Topic::Gratitude => &[
                "thank you", "thanks", "grateful", "gratitude", "appreciate", "thankful",
            ],
            Topic::Work => &[
                "work", "job", "boss", "coworker", "coworkers", "deadline", "deadlines",
                "school", "exam", "exams", "homework", "class", "study", "studying",
            ],
            Topic::Relationships => &[
                "relationship", "partner", "boyfriend", "girlfriend", "husband", "wife",
                "friend", "friends", "family", "breakup", "broke up", "divorce", "parents",
            ],
            Topic::Default => &[],
        }
    }
}

/// One pre-written reply and its optional follow-up hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CannedReply {
    pub text: &'static str,
    pub topic: Option<SuggestedTopic>,
}

const fn reply(text: &'static str, topic: Option<SuggestedTopic>) -> CannedReply {
    CannedReply { text, topic }
}

const ANXIETY: &[CannedReply] = &[
    reply("It sounds like anxiety has a strong grip on you right now. Let's slow things down together: breathe in for four counts, hold for four, and out for six.", Some(SuggestedTopic::Breathing)),
    reply("Feeling anxious can be so exhausting. Try naming five things you can see around you right now. It can help bring you back to the present moment.", Some(SuggestedTopic::Grounding)),
    reply("That worried feeling is your body trying to protect you, even when it overshoots. Would a short breathing exercise help right now?", Some(SuggestedTopic::Breathing)),
    reply("Panic can feel overwhelming, but it always passes. Place a hand on your chest, breathe slowly, and remind yourself that you are safe in this moment.", Some(SuggestedTopic::Breathing)),
    reply("You're not alone in feeling this way. What's the thought that keeps coming back the most? Sometimes putting it into words takes away some of its power.", Some(SuggestedTopic::Journaling)),
];

const SLEEP: &[CannedReply] = &[
    reply("Nights when sleep won't come can feel so long. Try relaxing your body one part at a time, starting with your toes and moving upward.", Some(SuggestedTopic::BodyScan)),
    reply("Being awake when you want to rest is frustrating. Would a calming sleep story help your mind settle?", Some(SuggestedTopic::SleepStory)),
    reply("If your mind is racing, try writing down what's on it before bed. Giving those thoughts a place to land can quiet them.", Some(SuggestedTopic::Journaling)),
    reply("Try a slow 4-7-8 breath: in for four, hold for seven, out for eight. A few rounds can help signal to your body that it's safe to rest.", Some(SuggestedTopic::Breathing)),
    reply("Rest still matters even if sleep doesn't come right away. Lying quietly with your eyes closed gives your body a chance to recover.", Some(SuggestedTopic::SleepStory)),
];

const STRESS: &[CannedReply] = &[
    reply("That sounds like a lot to carry. What is one small thing you could set down, even for the next hour?", None),
    reply("When everything feels urgent, it helps to pause. Take three slow breaths and let your shoulders drop.", Some(SuggestedTopic::Breathing)),
    reply("Feeling overwhelmed is a sign you've been holding a lot. Would it help to break things into smaller pieces together?", Some(SuggestedTopic::Journaling)),
    reply("Stress often shows up in the body first. Notice where you're holding tension and see if you can soften it a little.", Some(SuggestedTopic::BodyScan)),
];

const SADNESS: &[CannedReply] = &[
    reply("I'm sorry you're feeling this way. It's okay to not be okay, and I'm here to listen.", None),
    reply("Sadness can feel heavy. Would you like to talk about what's been weighing on you?", None),
    reply("Thank you for sharing how you feel. Writing down a few of those feelings might help you understand them a little more.", Some(SuggestedTopic::Journaling)),
    reply("Feeling lonely is really hard. Is there someone you trust that you could reach out to today, even with a short message?", None),
    reply("Be gentle with yourself right now. Small comforts like a warm drink, fresh air, or a favorite song can still matter.", Some(SuggestedTopic::Grounding)),
];

const GREETING: &[CannedReply] = &[
    reply("Hi there! I'm glad you're here. How are you feeling today?", None),
    reply("Hello! What's on your mind right now?", None),
    reply("Hey, it's good to hear from you. How has your day been so far?", None),
];

const GRATITUDE: &[CannedReply] = &[
    reply("You're very welcome. I'm always here whenever you need a moment to talk.", None),
    reply("It means a lot that you'd share that. Noticing what we're grateful for is a powerful habit.", Some(SuggestedTopic::Journaling)),
    reply("I'm glad I could help. Take care of yourself today.", None),
];

const WORK: &[CannedReply] = &[
    reply("Work and school pressures can pile up quickly. What feels most pressing right now?", None),
    reply("It's easy to measure ourselves by productivity. You are more than what you get done today.", None),
    reply("A short break can make a real difference. Could you step away for five minutes and take a few deep breaths?", Some(SuggestedTopic::Breathing)),
    reply("Deadlines can feel relentless. Would it help to list what's due and pick just one thing to start with?", Some(SuggestedTopic::Journaling)),
];

const RELATIONSHIPS: &[CannedReply] = &[
    reply("Relationships can bring up so many feelings. What happened that's been on your mind?", None),
    reply("It sounds like this relationship matters to you. How are you taking care of yourself through it?", None),
    reply("Conflict with people we care about is painful. Sometimes writing out what you wish you could say helps bring clarity.", Some(SuggestedTopic::Journaling)),
];

const DEFAULT: &[CannedReply] = &[
    reply("Thank you for sharing that with me. Can you tell me a little more about how you're feeling?", None),
    reply("I'm here and I'm listening. What would feel most helpful right now?", None),
    reply("That sounds important. How has it been affecting you?", None),
    reply("I hear you. Sometimes just putting things into words can help. What else is on your mind?", None),
    reply("Let's take a moment together. Would a short grounding exercise help you feel more settled?", Some(SuggestedTopic::Grounding)),
];

/// Reply pool for a topic.
pub fn pool_for(topic: Topic) -> &'static [CannedReply] {
    match topic {
        Topic::Anxiety => ANXIETY,
        Topic::Sleep => SLEEP,
        Topic::Stress => STRESS,
        Topic::Sadness => SADNESS,
        Topic::Greeting => GREETING,
        Topic::Gratitude => GRATITUDE,
        Topic::Work => WORK,
        Topic::Relationships => RELATIONSHIPS,
        Topic::Default => DEFAULT,
    }
}

/// First topic group (in priority order) whose keywords appear as whole words.
pub fn match_topic(text: &str) -> Topic {
    let padded = format!(" {} ", normalize(text));
    Topic::PRIORITY
        .into_iter()
        .find(|topic| {
            topic
                .keywords()
                .iter()
                .any(|kw| padded.contains(&format!(" {} ", normalize(kw))))
        })
        .unwrap_or(Topic::Default)
}

/// True if `text` is one of the canned replies or the crisis message.
pub fn is_canned_reply(text: &str) -> bool {
    text == CRISIS_RESPONSE
        || Topic::PRIORITY
            .iter()
            .chain(std::iter::once(&Topic::Default))
            .any(|t| pool_for(*t).iter().any(|r| r.text == text))
}

/// The crisis draft, identical whether built here or by the dispatcher.
pub fn crisis_draft() -> ResponseDraft {
    ResponseDraft::new(CRISIS_RESPONSE)
        .flagged(SafetyFlag::CrisisDetected)
        .with_topic(Some(SuggestedTopic::CrisisResources))
}

pub struct CannedResponder {
    classifier: RiskClassifier,
    rng: Mutex<StdRng>,
}

impl CannedResponder {
    pub fn new(classifier: RiskClassifier) -> Self {
        Self::with_rng(classifier, StdRng::from_entropy())
    }

    pub fn with_rng(classifier: RiskClassifier, rng: StdRng) -> Self {
        Self {
            classifier,
            rng: Mutex::new(rng),
        }
    }

    /// Deterministic selection for tests and reproducible runs.
    pub fn seeded(classifier: RiskClassifier, seed: u64) -> Self {
        Self::with_rng(classifier, StdRng::seed_from_u64(seed))
    }

    pub fn generate(&self, text: &str, history: &[Message]) -> ResponseDraft {
        if self.classifier.classify(text) {
            return crisis_draft();
        }

        let topic = match_topic(text);
        let pool = pool_for(topic);

        let last_reply = history
            .iter()
            .rev()
            .find(|m| m.sender == Sender::Assistant)
            .map(|m| m.text.as_str());

        let candidates: Vec<&CannedReply> = if pool.len() > 1 {
            pool.iter().filter(|r| Some(r.text) != last_reply).collect()
        } else {
            pool.iter().collect()
        };

        let index = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            rng.gen_range(0..candidates.len())
        };
        let chosen = candidates[index];

        tracing::debug!(topic = ?topic, "Canned reply selected");
        ResponseDraft::new(chosen.text).with_topic(chosen.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn responder(seed: u64) -> CannedResponder {
        CannedResponder::seeded(RiskClassifier::new(), seed)
    }

    fn assistant_message(text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            sender: Sender::Assistant,
            created_at: Utc::now(),
            text: text.to_string(),
            safety_flag: None,
        }
    }

    fn in_pool(topic: Topic, text: &str) -> bool {
        pool_for(topic).iter().any(|r| r.text == text)
    }

    #[test]
    fn test_pool_sizes_within_bounds() {
        for topic in Topic::PRIORITY.iter().chain(std::iter::once(&Topic::Default)) {
            let n = pool_for(*topic).len();
            assert!((1..=10).contains(&n), "{:?} has {} replies", topic, n);
        }
    }

    #[test]
    fn test_crisis_text_returns_fixed_resource_message() {
        let draft = responder(1).generate("I want to kill myself", &[]);
        assert_eq!(draft.text, CRISIS_RESPONSE);
        assert_eq!(draft.safety_flag, Some(SafetyFlag::CrisisDetected));
        assert_eq!(draft.suggested_topic, Some(SuggestedTopic::CrisisResources));
    }

    #[test]
    fn test_crisis_wins_over_topic_keywords() {
        // "anxious" and "sleep" would otherwise select a topic pool
        let draft = responder(2).generate("so anxious I can't sleep, I want to die", &[]);
        assert_eq!(draft.text, CRISIS_RESPONSE);
    }

    #[test]
    fn test_topic_priority_order() {
        assert_eq!(match_topic("I'm anxious and can't sleep"), Topic::Anxiety);
        assert_eq!(match_topic("I can't sleep, it's 3am"), Topic::Sleep);
        assert_eq!(match_topic("so stressed about work"), Topic::Stress);
        assert_eq!(match_topic("feeling sad about my friend"), Topic::Sadness);
        assert_eq!(match_topic("hello! thanks"), Topic::Greeting);
        assert_eq!(match_topic("thank you so much"), Topic::Gratitude);
        assert_eq!(match_topic("my boss and my partner"), Topic::Work);
        assert_eq!(match_topic("my girlfriend and I argued"), Topic::Relationships);
        assert_eq!(match_topic("the weather is odd today"), Topic::Default);
    }

    #[test]
    fn test_keywords_match_whole_words_only() {
        // "this" contains "hi" and "worker" contains "work"
        assert_eq!(match_topic("this is it"), Topic::Default);
        assert_eq!(match_topic("Hi"), Topic::Greeting);
    }

    #[test]
    fn test_sleep_message_draws_from_sleep_pool() {
        let r = responder(7);
        for _ in 0..20 {
            let draft = r.generate("I can't sleep, it's 3am", &[]);
            assert!(in_pool(Topic::Sleep, &draft.text), "unexpected: {}", draft.text);
            assert!(draft.safety_flag.is_none());
        }
    }

    #[test]
    fn test_same_seed_same_choices() {
        let a = responder(42);
        let b = responder(42);
        for _ in 0..10 {
            assert_eq!(
                a.generate("I feel anxious", &[]).text,
                b.generate("I feel anxious", &[]).text
            );
        }
    }

    #[test]
    fn test_avoids_repeating_last_assistant_reply() {
        let r = responder(3);
        let previous = ANXIETY[0].text;
        let history = vec![assistant_message(previous)];
        for _ in 0..30 {
            let draft = r.generate("panic again", &history);
            assert_ne!(draft.text, previous);
            assert!(in_pool(Topic::Anxiety, &draft.text));
        }
    }

    #[test]
    fn test_empty_text_gets_default_reply() {
        let draft = responder(5).generate("", &[]);
        assert!(in_pool(Topic::Default, &draft.text));
    }

    #[test]
    fn test_is_canned_reply() {
        assert!(is_canned_reply(CRISIS_RESPONSE));
        assert!(is_canned_reply(DEFAULT[0].text));
        assert!(!is_canned_reply("a model-written answer"));
    }
}
