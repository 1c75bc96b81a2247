//! Hand-authored fallback content.
//!
//! Every scenario has at least one entry. Durations are nominal reading
//! times at a slow, guided pace.

use super::Scenario;

pub(super) struct Entry {
    pub text: &'static str,
    pub duration_ms: u64,
}

const ANXIETY: &[Entry] = &[
    Entry {
        text: "It sounds like things feel intense right now, and that's okay. Let's slow \
               everything down together. Breathe in gently for four counts, hold for a moment, \
               and breathe out for six. You are safe in this moment, and there is no rush.",
        duration_ms: 18_000,
    },
    Entry {
        text: "Anxiety can feel overwhelming, but it always passes. Place a hand on your chest \
               and notice it rise and fall. With each slow breath out, let your shoulders soften \
               a little more. I'm right here with you.",
        duration_ms: 16_000,
    },
];

const GROUNDING: &[Entry] = &[
    Entry {
        text: "Let's bring your attention back to the room around you. Name five things you can \
               see, four things you can touch, three things you can hear, two things you can \
               smell, and one thing you can taste. Take your time with each one.",
        duration_ms: 22_000,
    },
    Entry {
        text: "Feel the weight of your body where you are sitting. Press your feet gently into \
               the floor and notice the support beneath you. You are here, in this moment, and \
               you are steady.",
        duration_ms: 15_000,
    },
];

const INTRODUCTION: &[Entry] = &[
    Entry {
        text: "Welcome. Let's take a quiet moment to settle in before we begin. Find a \
               comfortable position, let your breathing slow, and when you feel ready, bring \
               this memory gently to mind. There is nothing you need to do right now except \
               notice what comes up.",
        duration_ms: 20_000,
    },
    Entry {
        text: "Thank you for being here. We'll explore this memory together, at whatever pace \
               feels right for you. Take a slow breath in, and as you let it go, allow yourself \
               to arrive fully in this moment.",
        duration_ms: 17_000,
    },
];

const CONCLUSION: &[Entry] = &[
    Entry {
        text: "As we come to a close, take a moment to appreciate the care you've shown yourself \
               today. Revisiting memories takes courage. Take one more slow breath, and carry \
               whatever feels helpful from this time with you.",
        duration_ms: 17_000,
    },
    Entry {
        text: "We're nearing the end of our time together. Notice how you feel right now, \
               without needing to change anything. When you're ready, gently bring your \
               attention back to your surroundings.",
        duration_ms: 15_000,
    },
];

const PAUSE: &[Entry] = &[
    Entry {
        text: "Of course. Let's pause here for a moment. There's no hurry at all. Simply \
               breathe, and let me know whenever you'd like to continue.",
        duration_ms: 10_000,
    },
    Entry {
        text: "Let's take a gentle break. Rest your eyes if that feels comfortable, and just \
               notice your breath for a few moments. We can pick up again whenever you're ready.",
        duration_ms: 12_000,
    },
];

const SELF_COMPASSION: &[Entry] = &[
    Entry {
        text: "It sounds like you're being very hard on yourself. Imagine a close friend sharing \
               this with you. What might you say to them? You deserve that same kindness and \
               understanding.",
        duration_ms: 14_000,
    },
    Entry {
        text: "You did the best you could with what you knew at the time. Place a hand over \
               your heart and offer yourself a few kind words. Being human means being imperfect, \
               and that is okay.",
        duration_ms: 15_000,
    },
];

const MEMORY_EXPLORATION: &[Entry] = &[
    Entry {
        text: "Let's stay with this memory for a moment. What do you notice as you bring it to \
               mind? Perhaps a color, a sound, or a feeling in your body. There are no right or \
               wrong answers here.",
        duration_ms: 15_000,
    },
    Entry {
        text: "Take your time as you return to that moment. Where were you, and who was with \
               you? Notice any details that come forward, and let them unfold at their own pace.",
        duration_ms: 14_000,
    },
];

const CALMING: &[Entry] = &[
    Entry {
        text: "Let's take a slow, deep breath together. Breathe in through your nose, and let \
               it out slowly through your mouth. You're doing well, and we can continue \
               whenever you feel ready.",
        duration_ms: 14_000,
    },
    Entry {
        text: "I'm here with you. Take a moment to notice your breath, steady and unhurried. \
               Whatever you're feeling right now is welcome here.",
        duration_ms: 10_000,
    },
];

pub(super) fn entries(scenario: Scenario) -> &'static [Entry] {
    match scenario {
        Scenario::Anxiety => ANXIETY,
        Scenario::Grounding => GROUNDING,
        Scenario::Introduction => INTRODUCTION,
        Scenario::Conclusion => CONCLUSION,
        Scenario::Pause => PAUSE,
        Scenario::SelfCompassion => SELF_COMPASSION,
        Scenario::MemoryExploration => MEMORY_EXPLORATION,
        Scenario::Calming => CALMING,
    }
}
